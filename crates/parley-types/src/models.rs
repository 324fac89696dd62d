use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of simultaneously active pins in one peer conversation.
pub const PIN_CEILING: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// An authenticated actor as seen by the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub token_version: i64,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A stored message with all of its soft-state flags.
///
/// `receiver_id == None` marks a message addressed to the AI assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub content: String,
    pub attachment_ref: Option<String>,
    pub created_at: DateTime<Utc>,

    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    /// Identifier of the mark-read call that set `read_at`.
    pub read_batch: Option<i64>,

    pub deleted_for_sender: bool,
    pub deleted_for_admin: bool,
    pub deleted_for: BTreeSet<Uuid>,

    pub is_pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub pin_expires_at: Option<DateTime<Utc>>,
    pub pinned_by: Option<Uuid>,

    pub starred_by: BTreeSet<Uuid>,
}

impl Message {
    pub fn is_assistant_directed(&self) -> bool {
        self.receiver_id.is_none()
    }

    pub fn is_participant(&self, principal_id: Uuid) -> bool {
        self.sender_id == principal_id || self.receiver_id == Some(principal_id)
    }

    /// Every principal who should see state changes on this message.
    pub fn participants(&self) -> Vec<Uuid> {
        match self.receiver_id {
            Some(receiver) if receiver != self.sender_id => vec![self.sender_id, receiver],
            _ => vec![self.sender_id],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    Me,
    Everyone,
}

/// How long a pin stays active. `null` on the wire means [`PinDuration::Always`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinDuration {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[default]
    #[serde(rename = "always")]
    Always,
}

impl PinDuration {
    pub fn ttl(self) -> Option<Duration> {
        match self {
            PinDuration::Day => Some(Duration::hours(24)),
            PinDuration::Week => Some(Duration::days(7)),
            PinDuration::Month => Some(Duration::days(30)),
            PinDuration::Always => None,
        }
    }

    pub fn expires_at(self, pinned_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl().map(|ttl| pinned_at + ttl)
    }
}

/// How a message renders for one particular viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    HiddenForViewer,
    PlaceholderDeletedBySender,
    HiddenByModerator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_duration_wire_names() {
        let d: PinDuration = serde_json::from_str("\"7d\"").unwrap();
        assert_eq!(d, PinDuration::Week);
        assert_eq!(serde_json::to_string(&PinDuration::Day).unwrap(), "\"24h\"");
        assert!(PinDuration::Always.ttl().is_none());
        assert_eq!(PinDuration::Month.ttl(), Some(Duration::days(30)));
    }

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(Role::User.as_str(), "user");
        assert!("root".parse::<Role>().is_err());
    }
}
