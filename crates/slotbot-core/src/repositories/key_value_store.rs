//! Key-value store trait (port)

use std::time::Duration;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::DomainError;

/// Byte-valued store with per-key expiry enforced by the backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `None` when the key is absent or expired.
    async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Option<Vec<u8>>, DomainError>;

    /// Writes the value and (re)sets its time-to-live.
    async fn set(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), DomainError>;

    /// Idempotent: deleting an absent key succeeds.
    async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<(), DomainError>;
}
