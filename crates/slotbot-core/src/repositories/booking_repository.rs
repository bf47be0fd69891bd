//! Booking repository trait (port)

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};

use crate::context::RequestContext;
use crate::domain::{Booking, BookingId, BookingStatus, ReservationRequest, ReserveOutcome};
use crate::error::DomainError;

/// The slot reservation engine.
///
/// Implementations must guarantee that for one `(service, date, time)` at most
/// one booking is `confirmed` at a time, across processes.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Validates, then atomically claims the slot. `SlotOccupied` is an
    /// outcome, not an error.
    async fn reserve(
        &self,
        ctx: &RequestContext,
        request: &ReservationRequest,
    ) -> Result<ReserveOutcome, DomainError>;

    /// Times not held by a confirmed booking, ascending.
    async fn list_available_slots(
        &self,
        ctx: &RequestContext,
        service_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, DomainError>;

    /// Most recent first (date, then time, descending).
    async fn list_by_requester(
        &self,
        ctx: &RequestContext,
        requester_id: i64,
    ) -> Result<Vec<Booking>, DomainError>;

    async fn update_status(
        &self,
        ctx: &RequestContext,
        booking_id: BookingId,
        status: BookingStatus,
    ) -> Result<(), DomainError>;
}
