//! Booking domain entity

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::DomainError;

pub type BookingId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            BookingStatus::Pending => 0,
            BookingStatus::Confirmed => 1,
            BookingStatus::Cancelled => 2,
        }
    }

    /// Status only moves forward; re-applying the current status is a touch.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(DomainError::InvalidInput(format!("unknown booking status: {}", other))),
        }
    }
}

/// The conflict key of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub service_id: i32,
    pub date: NaiveDate,
    pub time_slot: Option<NaiveTime>,
}

impl SlotKey {
    pub fn new(service_id: i32, date: NaiveDate, time_slot: Option<NaiveTime>) -> Self {
        Self { service_id, date, time_slot }
    }

    /// Advisory lock key, part of the storage contract: any process that wants
    /// to serialize with the bot must derive the same string,
    /// `"{service_id}|{YYYY-MM-DD}|{HH:MM:SS}"`, with `*` for a slot-less booking.
    /// The database hashes it with `hashtext`.
    pub fn lock_key(&self) -> String {
        let time = match self.time_slot {
            Some(t) => t.format("%H:%M:%S").to_string(),
            None => "*".to_string(),
        };
        format!("{}|{}|{}", self.service_id, self.date.format("%Y-%m-%d"), time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, Default)]
pub struct GuestInfo {
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    pub organization: Option<String>,
    pub position: Option<String>,
    pub visit_type: Option<String>,
}

impl GuestInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// A request to hold one slot. Validated before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ReservationRequest {
    #[validate(range(min = 1))]
    pub requester_id: i64,
    #[validate(range(min = 1))]
    pub service_id: i32,
    pub date: NaiveDate,
    pub time_slot: Option<NaiveTime>,
    #[validate(nested)]
    pub guest: GuestInfo,
    pub tracker_ticket_id: Option<String>,
    /// `Confirmed` claims the slot; `Pending` records interest without claiming it.
    pub initial_status: BookingStatus,
}

impl ReservationRequest {
    pub fn new(
        requester_id: i64,
        service_id: i32,
        date: NaiveDate,
        time_slot: Option<NaiveTime>,
        guest: GuestInfo,
    ) -> Self {
        Self {
            requester_id,
            service_id,
            date,
            time_slot,
            guest,
            tracker_ticket_id: None,
            initial_status: BookingStatus::Confirmed,
        }
    }

    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.initial_status = status;
        self
    }

    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.service_id, self.date, self.time_slot)
    }

    pub fn check(&self) -> Result<(), DomainError> {
        self.validate()
            .map_err(|e| DomainError::InvalidInput(e.to_string()))?;
        if self.initial_status == BookingStatus::Cancelled {
            return Err(DomainError::InvalidInput(
                "a reservation cannot start cancelled".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Created { booking_id: BookingId },
    SlotOccupied,
}

impl ReserveOutcome {
    pub fn booking_id(&self) -> Option<BookingId> {
        match self {
            ReserveOutcome::Created { booking_id } => Some(*booking_id),
            ReserveOutcome::SlotOccupied => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub requester_id: i64,
    pub service_id: i32,
    pub date: NaiveDate,
    pub time_slot: Option<NaiveTime>,
    pub guest: GuestInfo,
    pub tracker_ticket_id: Option<String>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.service_id, self.date, self.time_slot)
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn request() -> ReservationRequest {
        ReservationRequest::new(
            10,
            5,
            date(),
            NaiveTime::from_hms_opt(11, 0, 0),
            GuestInfo::named("Ada"),
        )
    }

    #[test]
    fn test_lock_key_is_stable() {
        let slot = SlotKey::new(5, date(), NaiveTime::from_hms_opt(11, 0, 0));
        assert_eq!(slot.lock_key(), "5|2026-03-01|11:00:00");
        assert_eq!(SlotKey::new(5, date(), None).lock_key(), "5|2026-03-01|*");
        assert_ne!(
            SlotKey::new(51, date(), None).lock_key(),
            SlotKey::new(5, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(), None).lock_key()
        );
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request().check().is_ok());
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let mut r = request();
        r.requester_id = 0;
        assert!(matches!(r.check(), Err(DomainError::InvalidInput(_))));

        let mut r = request();
        r.service_id = -1;
        assert!(matches!(r.check(), Err(DomainError::InvalidInput(_))));

        let mut r = request();
        r.guest.name = "   ".into();
        assert!(matches!(r.check(), Err(DomainError::InvalidInput(_))));

        let r = request().with_status(BookingStatus::Cancelled);
        assert!(matches!(r.check(), Err(DomainError::InvalidInput(_))));
    }

    #[test]
    fn test_status_moves_forward_only() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for s in [BookingStatus::Pending, BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert_eq!(s.as_str().parse::<BookingStatus>().unwrap(), s);
        }
        assert!("booked".parse::<BookingStatus>().is_err());
    }
}
