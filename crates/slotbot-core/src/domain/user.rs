//! Registered chat user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// The chat platform's user id; bookings reference it as `requester_id`.
    pub external_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub grade: i32,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("there")
    }
}

/// Profile fields captured when a user starts a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewUser {
    #[validate(range(min = 1))]
    pub external_id: i64,
    #[validate(length(max = 64))]
    pub username: Option<String>,
    #[validate(length(max = 128))]
    pub first_name: Option<String>,
    #[validate(length(max = 128))]
    pub last_name: Option<String>,
}

impl NewUser {
    pub fn new(external_id: i64) -> Self {
        Self {
            external_id,
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn check(&self) -> Result<(), DomainError> {
        self.validate()
            .map_err(|e| DomainError::InvalidInput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_validation() {
        assert!(NewUser::new(42).with_username("ada").check().is_ok());
        assert!(matches!(NewUser::new(0).check(), Err(DomainError::InvalidInput(_))));
        assert!(NewUser::new(1).with_username("x".repeat(65)).check().is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_username() {
        let now = Utc::now();
        let mut user = User {
            id: 1,
            external_id: 42,
            username: Some("ada".into()),
            first_name: None,
            last_name: None,
            grade: 0,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(user.display_name(), "ada");
        user.first_name = Some("Ada".into());
        assert_eq!(user.display_name(), "Ada");
        user.username = None;
        user.first_name = None;
        assert_eq!(user.display_name(), "there");
    }
}
