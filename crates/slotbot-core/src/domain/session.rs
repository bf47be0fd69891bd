//! Conversation session entity

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open key/value bag carried between conversation turns.
pub type StateData = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub current_state: String,
    /// Never absent: a missing map is read back as an empty one.
    pub state_data: StateData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.state_data.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.state_data.get(key).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let now = Utc::now();
        let session = Session {
            user_id: 1,
            current_state: "form".into(),
            state_data: HashMap::from([
                ("service_id".to_string(), json!(5)),
                ("date".to_string(), json!("2026-03-01")),
            ]),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(session.get_i64("service_id"), Some(5));
        assert_eq!(session.get_str("date"), Some("2026-03-01"));
        assert_eq!(session.get_str("service_id"), None);
        assert_eq!(session.get_i64("missing"), None);
    }
}
