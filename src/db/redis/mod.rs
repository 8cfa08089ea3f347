pub mod cache;
pub mod macros;

pub use cache::create_redis_client;
pub use cache::CacheKey;
pub use cache::FeedCache;
pub use cache::FeedCacheHandle;
