//! Domain errors
//!
//! The fixed taxonomy every adapter normalizes into. Backend error types never
//! cross a repository boundary.

use std::fmt::Display;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Slot is already occupied")]
    SlotOccupied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session not found for user {0}")]
    SessionNotFound(i64),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out")]
    Timeout,

    #[error("Storage error in {operation}: {message}")]
    StorageError {
        operation: &'static str,
        message: String,
    },
}

impl DomainError {
    pub fn storage(operation: &'static str, err: impl Display) -> Self {
        DomainError::StorageError {
            operation,
            message: err.to_string(),
        }
    }

    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::SlotOccupied => "slot_occupied",
            DomainError::NotFound(_) => "not_found",
            DomainError::SessionNotFound(_) => "session_not_found",
            DomainError::Cancelled => "cancelled",
            DomainError::Timeout => "timeout",
            DomainError::StorageError { .. } => "storage_error",
        }
    }

    /// Only the caller's own deadline or cancellation is worth a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Cancelled | DomainError::Timeout)
    }

    /// Outcomes that are part of normal operation rather than faults.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidInput(_)
                | DomainError::SlotOccupied
                | DomainError::NotFound(_)
                | DomainError::SessionNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_interruptions_are_retryable() {
        assert!(DomainError::Cancelled.is_retryable());
        assert!(DomainError::Timeout.is_retryable());
        assert!(!DomainError::SlotOccupied.is_retryable());
        assert!(!DomainError::storage("reserve_slot", "boom").is_retryable());
        assert!(!DomainError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_storage_error_carries_operation() {
        let err = DomainError::storage("update_booking_status", "connection reset");
        assert_eq!(err.kind(), "storage_error");
        assert_eq!(
            err.to_string(),
            "Storage error in update_booking_status: connection reset"
        );
        assert!(!err.is_expected());
        assert!(DomainError::SessionNotFound(7).is_expected());
    }
}
