// ============================================================================
// Slotbot Core - Session Store
// File: crates/slotbot-core/src/services/session_store.rs
// ============================================================================
//! Conversation state kept in a TTL key-value store, one record per user.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::context::RequestContext;
use crate::domain::{Session, StateData};
use crate::error::DomainError;
use crate::repositories::KeyValueStore;

/// Stored JSON shape. `state_data` may be `null` or missing in records written
/// by other producers; it is normalized on read.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    user_id: i64,
    current_state: String,
    #[serde(default)]
    state_data: Option<StateData>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SessionRecord> for Session {
    fn from(r: SessionRecord) -> Self {
        Session {
            user_id: r.user_id,
            current_state: r.current_state,
            state_data: r.state_data.unwrap_or_default(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<&Session> for SessionRecord {
    fn from(s: &Session) -> Self {
        SessionRecord {
            user_id: s.user_id,
            current_state: s.current_state.clone(),
            state_data: Some(s.state_data.clone()),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Read-modify-write session access with last-writer-wins semantics.
pub struct SessionStore<K: KeyValueStore + ?Sized> {
    store: Arc<K>,
    ttl: Duration,
    key_prefix: String,
}

impl<K: KeyValueStore + ?Sized> Clone for SessionStore<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
            key_prefix: self.key_prefix.clone(),
        }
    }
}

impl<K: KeyValueStore + ?Sized> SessionStore<K> {
    pub fn new(store: Arc<K>, ttl: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            ttl,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self, user_id: i64) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }

    /// Replaces the whole session, keeping the `created_at` of any existing
    /// record and refreshing the TTL.
    pub async fn save(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        state: &str,
        data: StateData,
    ) -> Result<Session, DomainError> {
        let now = Utc::now();
        let created_at = match self.load(ctx, user_id).await {
            Ok(existing) => existing.created_at,
            Err(DomainError::SessionNotFound(_)) => now,
            Err(DomainError::StorageError { operation: "decode_session", .. }) => {
                warn!(user_id, "overwriting undecodable session");
                now
            }
            Err(e) => return Err(e),
        };

        let session = Session {
            user_id,
            current_state: state.to_string(),
            state_data: data,
            created_at,
            updated_at: now,
        };
        self.write(ctx, &session).await?;
        debug!(user_id, state, "session saved");
        Ok(session)
    }

    pub async fn get(&self, ctx: &RequestContext, user_id: i64) -> Result<Session, DomainError> {
        self.load(ctx, user_id).await
    }

    /// Deleting a missing session succeeds.
    pub async fn clear(&self, ctx: &RequestContext, user_id: i64) -> Result<(), DomainError> {
        self.store.delete(ctx, &self.key(user_id)).await
    }

    /// Moves to `state` without touching `state_data`.
    pub async fn update_state(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        state: &str,
    ) -> Result<Session, DomainError> {
        let mut session = self.load(ctx, user_id).await?;
        session.current_state = state.to_string();
        session.updated_at = Utc::now();
        self.write(ctx, &session).await?;
        debug!(user_id, state, "session state updated");
        Ok(session)
    }

    async fn load(&self, ctx: &RequestContext, user_id: i64) -> Result<Session, DomainError> {
        let bytes = self
            .store
            .get(ctx, &self.key(user_id))
            .await?
            .ok_or(DomainError::SessionNotFound(user_id))?;
        let record: SessionRecord = serde_json::from_slice(&bytes).map_err(|e| {
            error!(operation = "decode_session", user_id, error = %e, "storage_error");
            DomainError::storage("decode_session", e)
        })?;
        Ok(record.into())
    }

    async fn write(&self, ctx: &RequestContext, session: &Session) -> Result<(), DomainError> {
        let bytes = serde_json::to_vec(&SessionRecord::from(session))
            .map_err(|e| DomainError::storage("encode_session", e))?;
        self.store
            .set(ctx, &self.key(session.user_id), bytes, self.ttl)
            .await
    }
}
