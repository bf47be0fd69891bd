//! Timing, counting and error logging around every storage call.

use std::future::Future;
use std::time::Instant;

use slotbot_core::{DomainError, RequestContext};
use slotbot_shared::Metrics;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Redis,
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Redis => "redis",
            Backend::Memory => "memory",
        }
    }

    fn failure_event(&self) -> &'static str {
        match self {
            Backend::Postgres => "database_error",
            Backend::Redis | Backend::Memory => "cache_error",
        }
    }
}

/// Runs `op` under `ctx`, recording duration and outcome.
///
/// Cancellation and deadline expiry drop the in-flight future, which rolls back
/// any open transaction. Storage failures are logged here and nowhere else.
pub async fn observe<T, F, Fut>(
    ctx: &RequestContext,
    metrics: Option<&Metrics>,
    backend: Backend,
    operation: &'static str,
    op: F,
) -> Result<T, DomainError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let start = Instant::now();
    let result = match ctx.check() {
        Err(interrupted) => Err(interrupted.into()),
        Ok(()) => match ctx.run(op()).await {
            Ok(inner) => inner,
            Err(interrupted) => Err(interrupted.into()),
        },
    };
    let elapsed = start.elapsed().as_secs_f64();

    if let Some(m) = metrics {
        m.observe_storage(backend.as_str(), operation, elapsed);
    }

    if let Err(e) = &result {
        if let Some(m) = metrics {
            m.inc_storage_errors(backend.as_str(), operation, e.kind());
        }
        match e {
            DomainError::Cancelled => {
                info!(backend = backend.as_str(), operation, "canceled_by_context")
            }
            DomainError::Timeout => {
                info!(backend = backend.as_str(), operation, "canceled_by_timeout")
            }
            DomainError::SlotOccupied => info!(operation, "slot_is_already_occupied"),
            DomainError::StorageError { message, .. } => {
                error!(backend = backend.as_str(), operation, error = %message, "{}", backend.failure_event())
            }
            other => info!(backend = backend.as_str(), operation, kind = other.kind(), "{}", other),
        }
    }

    result
}
