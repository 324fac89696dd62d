use parley_types::models::Principal;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::events::DomainEvent;
use crate::service::{MessageService, Outcome};

impl MessageService {
    /// Mark everything `sender_id` sent to `reader_id` as read in one batch.
    /// Returns the number of messages changed.
    pub async fn mark_read(
        &self,
        principal: &Principal,
        reader_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Outcome<usize>> {
        if reader_id != principal.id {
            return Err(CoreError::Authorization(
                "read receipts can only be set by the reader".into(),
            ));
        }

        let now = self.now();
        let batch = self
            .blocking(move |db| db.mark_read(reader_id, sender_id, now))
            .await?;

        let Some(batch) = batch else {
            return Ok(Outcome::quiet(0));
        };

        debug!(
            "{} read {} messages from {} (batch {})",
            reader_id,
            batch.message_ids.len(),
            sender_id,
            batch.batch_id
        );

        let count = batch.message_ids.len();
        Ok(Outcome::new(
            count,
            vec![DomainEvent::MessagesRead {
                reader_id,
                sender_id,
                batch_id: batch.batch_id,
                read_at: batch.read_at,
                message_ids: batch.message_ids,
            }],
        ))
    }

    /// Revert the caller's most recent read batch of `target_id`'s messages,
    /// bounded by the caller's last reply. A no-op returns zero.
    pub async fn mark_unread(
        &self,
        principal: &Principal,
        reader_id: Uuid,
        target_id: Uuid,
    ) -> Result<Outcome<usize>> {
        if reader_id != principal.id {
            return Err(CoreError::Authorization(
                "read receipts can only be reverted by the reader".into(),
            ));
        }

        let batch = self
            .blocking(move |db| db.mark_unread(reader_id, target_id))
            .await?;

        let Some(batch) = batch else {
            return Ok(Outcome::quiet(0));
        };

        debug!(
            "{} reverted read batch {} ({} messages from {})",
            reader_id,
            batch.batch_id,
            batch.message_ids.len(),
            target_id
        );

        let count = batch.message_ids.len();
        Ok(Outcome::new(
            count,
            vec![DomainEvent::MessagesUnread {
                reader_id,
                target_id,
                message_ids: batch.message_ids,
            }],
        ))
    }
}
