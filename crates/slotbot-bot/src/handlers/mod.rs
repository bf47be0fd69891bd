//! Update handlers

pub mod booking;

use async_trait::async_trait;
use slotbot_core::{DomainError, RequestContext};

use crate::transport::InboundEvent;

pub use booking::BookingHandler;

/// Turns one inbound event into the reply text for its chat.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, event: &InboundEvent) -> Result<String, DomainError>;
}
