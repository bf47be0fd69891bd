// ============================================================================
// Slotbot Infrastructure - Redis Key-Value Store
// File: crates/slotbot-infrastructure/src/cache/redis_store.rs
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Connection, CreatePoolError, Pool, PoolConfig, Runtime};
use slotbot_core::repositories::KeyValueStore;
use slotbot_core::{DomainError, RequestContext};
use slotbot_shared::config::RedisSettings;
use slotbot_shared::Metrics;

use crate::instrument::{observe, Backend};

pub fn create_redis_pool(settings: &RedisSettings) -> Result<Pool, CreatePoolError> {
    let mut cfg = Config::from_url(settings.url.as_str());
    cfg.pool = Some(PoolConfig::new(settings.max_connections));
    cfg.create_pool(Some(Runtime::Tokio1))
}

/// Redis-backed store. TTLs are set with `PSETEX`, so expiry is enforced by
/// the server at millisecond precision.
pub struct RedisStore {
    pool: Pool,
    metrics: Option<Arc<Metrics>>,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn conn(&self, operation: &'static str) -> Result<Connection, DomainError> {
        self.pool
            .get()
            .await
            .map_err(|e| DomainError::storage(operation, e))
    }
}

/// Whole milliseconds, rounded up so a sub-millisecond TTL still expires
/// rather than being rejected.
fn ttl_millis(ttl: Duration) -> u64 {
    let ms = ttl.as_millis().max(1);
    u64::try_from(ms).unwrap_or(u64::MAX)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Option<Vec<u8>>, DomainError> {
        observe(ctx, self.metrics.as_deref(), Backend::Redis, "kv_get", || async {
            let mut conn = self.conn("kv_get").await?;
            conn.get::<_, Option<Vec<u8>>>(key)
                .await
                .map_err(|e| DomainError::storage("kv_get", e))
        })
        .await
    }

    async fn set(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), DomainError> {
        observe(ctx, self.metrics.as_deref(), Backend::Redis, "kv_set", || async {
            let mut conn = self.conn("kv_set").await?;
            conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
                .await
                .map_err(|e| DomainError::storage("kv_set", e))
        })
        .await
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<(), DomainError> {
        observe(ctx, self.metrics.as_deref(), Backend::Redis, "kv_delete", || async {
            let mut conn = self.conn("kv_delete").await?;
            conn.del::<_, ()>(key)
                .await
                .map_err(|e| DomainError::storage("kv_delete", e))
        })
        .await
    }
}
