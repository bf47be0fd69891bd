//! # Slotbot Infrastructure
//! 
//! Database and cache implementations (adapters).

pub mod cache;
pub mod database;
pub mod instrument;

pub use cache::{create_redis_pool, MemoryStore, RedisStore};
pub use database::{create_pool, ping, run_migrations, PgBookingRepository, PgUserRepository};
pub use instrument::{observe, Backend};
