use chrono::{DateTime, Utc};
use parley_types::events::PinChange;
use parley_types::models::Message;
use uuid::Uuid;

use crate::visibility::DeletionEffect;

/// A state change produced by one mutation. The gateway turns each into
/// per-principal deliveries; nothing here knows about connections.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    MessageCreated {
        message: Message,
    },
    MessageDeleted {
        message: Message,
        effect: DeletionEffect,
        requester: Uuid,
    },
    PinChanged {
        message: Message,
        change: PinChange,
    },
    MessageStarred {
        message_id: Uuid,
        principal_id: Uuid,
        starred: bool,
    },
    MessagesRead {
        reader_id: Uuid,
        sender_id: Uuid,
        batch_id: i64,
        read_at: DateTime<Utc>,
        message_ids: Vec<Uuid>,
    },
    MessagesUnread {
        reader_id: Uuid,
        target_id: Uuid,
        message_ids: Vec<Uuid>,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::MessageCreated { .. } => "message_created",
            DomainEvent::MessageDeleted { .. } => "message_deleted",
            DomainEvent::PinChanged { .. } => "message_pinned",
            DomainEvent::MessageStarred { .. } => "message_starred",
            DomainEvent::MessagesRead { .. } => "messages_read",
            DomainEvent::MessagesUnread { .. } => "messages_unread",
        }
    }
}
