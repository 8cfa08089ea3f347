use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use tokio::sync::mpsc;

/// Cache key: feed type plus scope plus requested size
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TopGlobal { limit: usize },
    TopCountry { code: String, limit: usize },
    ForUser { user_id: String, limit: usize },
    Emerging { user_id: String, limit: usize },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TopGlobal { limit } => write!(f, "feed:top-global:{}", limit),
            CacheKey::TopCountry { code, limit } => {
                write!(f, "feed:top-country:{}:{}", code.to_lowercase(), limit)
            }
            CacheKey::ForUser { user_id, limit } => {
                write!(f, "feed:for-user:{}:{}", user_id, limit)
            }
            CacheKey::Emerging { user_id, limit } => {
                write!(f, "feed:emerging:{}:{}", user_id, limit)
            }
        }
    }
}

/// Creates a Redis client for the feed cache. The connection itself is
/// established lazily per operation.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Feed-result cache over Redis.
///
/// The cache is strictly best-effort: a miss, a connection failure, or a
/// corrupt entry all read as "not cached" and the caller falls through to a
/// direct graph query.
#[derive(Clone)]
pub struct FeedCache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct FeedCacheHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl FeedCacheHandle {
    /// Signals the writer task to flush pending writes and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl FeedCache {
    /// Creates the cache and spawns its background write task, so cache
    /// writes never sit on the response path
    pub fn new(redis_client: Client) -> (Self, FeedCacheHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        (cache, FeedCacheHandle { shutdown_tx })
    }

    /// Background task that processes cache write messages, flushing the
    /// queue on shutdown
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::debug!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::warn!(error = %e, "Cache write failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::warn!(error = %e, "Cache flush write failed");
                        }
                    }
                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(
        client: &Client,
        msg: CacheWriteMessage,
    ) -> Result<(), redis::RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }

    /// Retrieves a cached value. Any failure along the way is logged and
    /// reads as a miss.
    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let mut conn = match self.redis_client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache unavailable, bypassing");
                return None;
            }
        };

        let cached: Option<String> = match conn.get(key.to_string()).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, bypassing");
                return None;
            }
        };

        cached.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Discarding undecodable cache entry");
                None
            }
        })
    }

    /// Serializes the value and hands it to the background writer; returns
    /// immediately
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: key.to_string(),
            value: json,
            ttl,
        };

        if self.write_tx.send(msg).is_err() {
            tracing::warn!(key = %key, "Cache writer gone, dropping write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_top_global() {
        let key = CacheKey::TopGlobal { limit: 20 };
        assert_eq!(format!("{}", key), "feed:top-global:20");
    }

    #[test]
    fn test_cache_key_top_country_lowercases_code() {
        let key = CacheKey::TopCountry {
            code: "AR".to_string(),
            limit: 10,
        };
        assert_eq!(format!("{}", key), "feed:top-country:ar:10");
    }

    #[test]
    fn test_cache_key_for_user() {
        let key = CacheKey::ForUser {
            user_id: "u42".to_string(),
            limit: 20,
        };
        assert_eq!(format!("{}", key), "feed:for-user:u42:20");
    }

    #[test]
    fn test_cache_key_emerging() {
        let key = CacheKey::Emerging {
            user_id: "u42".to_string(),
            limit: 5,
        };
        assert_eq!(format!("{}", key), "feed:emerging:u42:5");
    }

    #[tokio::test]
    async fn test_unreachable_cache_reads_as_miss() {
        // Nothing listens on this port; the cache must degrade silently
        let client = create_redis_client("redis://127.0.0.1:1/").unwrap();
        let (cache, _handle) = FeedCache::new(client);

        let key = CacheKey::TopGlobal { limit: 20 };
        let hit: Option<Vec<String>> = cache.get(&key).await;
        assert_eq!(hit, None);

        // Writes are swallowed too
        cache.set_in_background(&key, &vec!["x".to_string()], 60);
    }
}
