//! Key-value store adapters

pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::{create_redis_pool, RedisStore};
