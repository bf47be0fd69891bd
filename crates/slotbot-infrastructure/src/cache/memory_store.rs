//! In-process key-value store with lazy expiry.
//!
//! Used when Redis is disabled and in tests. Expiry follows
//! `tokio::time::Instant`, so paused-clock tests can step past a TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use slotbot_core::repositories::KeyValueStore;
use slotbot_core::{DomainError, RequestContext};
use slotbot_shared::Metrics;
use tokio::time::Instant;

use crate::instrument::{observe, Backend};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Entry>,
    metrics: Option<Arc<Metrics>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Entries currently held, expired ones included until touched or purged.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.map.len())
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entry = self.map.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        // Only drop it if nobody rewrote the key in the meantime.
        self.map.remove_if(key, |_, e| e.is_expired(now));
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Option<Vec<u8>>, DomainError> {
        observe(ctx, self.metrics.as_deref(), Backend::Memory, "kv_get", || async {
            Ok(self.read(key))
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
        observe(ctx, self.metrics.as_deref(), Backend::Memory, "kv_set", || async {
            let entry = Entry {
                value,
                expires_at: Instant::now() + ttl,
            };
            self.map.insert(key.to_string(), entry);
            Ok(())
        })
        .await
    }

    async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<(), DomainError> {
        observe(ctx, self.metrics.as_deref(), Backend::Memory, "kv_delete", || async {
            self.map.remove(key);
            Ok(())
        })
        .await
    }
}
