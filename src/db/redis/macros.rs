/// Get-or-compute caching for feed queries.
///
/// Checks the cache for `$key`; on a miss, evaluates `$block` (which may use
/// `?`), stores the result in the background with `$ttl`, and yields it.
/// Because `FeedCache::get` treats every cache failure as a miss, the macro
/// never fails on account of the cache.
///
/// # Example
/// ```rust,ignore
/// let ranked = cached!(self.cache, key, ttl, {
///     let rows = self.graph.global_song_stats(pool).await?;
///     rank_by_popularity(rows, limit)
/// });
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(hit) = $cache.get(&$key).await {
            hit
        } else {
            let value = $block;
            $cache.set_in_background(&$key, &value, $ttl);
            value
        }
    }};
}
