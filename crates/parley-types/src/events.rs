use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;
use crate::models::Role;

/// Events sent over the WebSocket gateway.
///
/// Each carries the minimal delta a client needs to apply the same state
/// transition locally without re-fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: Uuid,
        username: String,
        role: Role,
        online_users: Vec<Uuid>,
    },

    /// Handshake or protocol failure; the server closes the socket after sending it
    Error { message: String },

    /// A new message was stored
    MessageCreated { message: MessageView },

    /// Deletion flags changed. `deleted_for_me` is only ever true for the
    /// viewer who asked for it.
    MessageDeleted {
        message_id: Uuid,
        sender_id: Uuid,
        receiver_id: Option<Uuid>,
        deleted_for_sender: bool,
        deleted_for_admin: bool,
        deleted_for_me: bool,
    },

    /// Pin state changed (pin, unpin, expiry or eviction)
    MessagePinned {
        message_id: Uuid,
        is_pinned: bool,
        pinned_at: Option<DateTime<Utc>>,
        pin_expires_at: Option<DateTime<Utc>>,
        pinned_by: Option<Uuid>,
        reason: PinChange,
    },

    /// The receiving principal starred or unstarred a message
    MessageStarred { message_id: Uuid, is_starred: bool },

    /// A reader acknowledged a batch of messages
    MessagesRead {
        reader_id: Uuid,
        sender_id: Uuid,
        read_at: DateTime<Utc>,
        batch_id: i64,
        message_ids: Vec<Uuid>,
    },

    /// A reader reverted their most recent read batch
    MessagesUnread {
        reader_id: Uuid,
        target_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    /// A principal came online or went offline
    UserStatusChange {
        user_id: Uuid,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },

    /// Delivered to admin connections when a moderator hides a message
    ModerationAlert {
        message_id: Uuid,
        moderator_id: Uuid,
        sender_id: Uuid,
        receiver_id: Option<Uuid>,
    },

    /// This connection's credential was superseded by a newer login
    SessionInvalidated { token_version: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinChange {
    Pinned,
    Unpinned,
    Expired,
    Evicted,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}
