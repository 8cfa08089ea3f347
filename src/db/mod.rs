pub mod documents;
pub mod graph;
pub mod redis;

pub use documents::{Collection, DocumentRow, DocumentSource, DocumentStore};
pub use graph::{GraphReader, GraphStore, GraphWriter};
pub use redis::{create_redis_client, CacheKey, FeedCache};
