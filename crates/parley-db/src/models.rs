//! Storage-side types. Distinct from parley-types API models to keep the
//! DB layer's inputs and outcomes explicit.

use chrono::{DateTime, Utc};
use parley_types::models::{Message, Role};
use uuid::Uuid;

pub struct PrincipalRow {
    pub id: Uuid,
    pub username: String,
    pub password: String,
    pub role: Role,
    pub token_version: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

pub struct NewMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub content: String,
    pub attachment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Field-level patch applied by [`crate::Database::apply_patch`].
/// `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct MessagePatch {
    pub deleted_for_sender: Option<bool>,
    pub deleted_for_admin: Option<bool>,
    pub hide_for: Option<Uuid>,
    pub star: Option<(Uuid, bool)>,
    pub clear_pin: bool,
}

/// Result of a pin request, including everything the sweep and eviction touched.
#[derive(Debug)]
pub struct PinOutcome {
    pub message: Message,
    pub expired: Vec<Message>,
    pub evicted: Vec<Message>,
}

#[derive(Debug)]
pub struct ReadBatch {
    pub batch_id: i64,
    pub read_at: DateTime<Utc>,
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug)]
pub struct UnreadBatch {
    pub batch_id: i64,
    pub message_ids: Vec<Uuid>,
}
