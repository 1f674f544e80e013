//! Frame types for the presence channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Well-known values of the `type` discriminator.
pub mod kinds {
    /// A user's activity status changed.
    pub const USER_STATUS: &str = "user_status";
}

/// Activity status announced over the presence channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    /// Actively using the application.
    Online,
    /// Connected but idle.
    Away,
    /// Leaving or gone.
    Offline,
}

impl ActivityStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Online => "online",
            ActivityStatus::Away => "away",
            ActivityStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ActivityStatus::Online),
            "away" => Ok(ActivityStatus::Away),
            "offline" => Ok(ActivityStatus::Offline),
            _ => Err("Invalid activity status"),
        }
    }
}

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Announce this client's activity status.
    #[serde(rename = "user_status")]
    UserStatus {
        /// The announced status.
        status: ActivityStatus,
    },
}

impl Frame {
    /// Create a new UserStatus frame.
    #[must_use]
    pub fn user_status(status: ActivityStatus) -> Self {
        Frame::UserStatus { status }
    }

    /// The `type` discriminator this frame serializes with.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::UserStatus { .. } => kinds::USER_STATUS,
        }
    }
}

/// A frame received from the server.
///
/// Only the `type` field is interpreted; the remaining keys are kept as-is
/// so listeners can read application-specific message types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The `type` discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// All other keys of the frame.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InboundMessage {
    /// Create a message with the given type and no fields.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get the message type.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Look up a field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Interpret this message as a user status update.
    ///
    /// Returns `None` for other message types or when the user id or
    /// status is missing or malformed. Both `user_id` and `userId` are
    /// accepted, as either a string or a number.
    #[must_use]
    pub fn status_update(&self) -> Option<StatusUpdate> {
        if self.kind != kinds::USER_STATUS {
            return None;
        }

        let user_id = match self.get("user_id").or_else(|| self.get("userId"))? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let status = self.get("status")?.as_str()?.parse().ok()?;

        Some(StatusUpdate { user_id, status })
    }
}

/// A decoded `user_status` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// The user whose status changed.
    pub user_id: String,
    /// The new status.
    pub status: ActivityStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_status_parse() {
        assert_eq!("online".parse(), Ok(ActivityStatus::Online));
        assert_eq!("away".parse(), Ok(ActivityStatus::Away));
        assert_eq!("offline".parse(), Ok(ActivityStatus::Offline));
        assert!("busy".parse::<ActivityStatus>().is_err());
        assert_eq!(ActivityStatus::Away.to_string(), "away");
    }

    #[test]
    fn test_frame_kind() {
        let frame = Frame::user_status(ActivityStatus::Online);
        assert_eq!(frame.kind(), kinds::USER_STATUS);
    }

    #[test]
    fn test_status_update_numeric_user_id() {
        let msg = InboundMessage::new(kinds::USER_STATUS)
            .with_field("userId", json!(17))
            .with_field("status", json!("away"));

        let update = msg.status_update().unwrap();
        assert_eq!(update.user_id, "17");
        assert_eq!(update.status, ActivityStatus::Away);
    }

    #[test]
    fn test_status_update_rejects_other_kinds() {
        let msg = InboundMessage::new("notification")
            .with_field("user_id", json!("1"))
            .with_field("status", json!("online"));
        assert!(msg.status_update().is_none());

        let bad_status = InboundMessage::new(kinds::USER_STATUS)
            .with_field("user_id", json!("1"))
            .with_field("status", json!("sleeping"));
        assert!(bad_status.status_update().is_none());
    }
}
