use parley_types::api::DeleteResult;
use parley_types::models::{DeleteMode, Message, Principal};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::DomainEvent;
use crate::service::{MessageService, Outcome};
use crate::visibility::plan_deletion;

/// Per-id results of a bulk delete. Ids that could not be acted on are
/// listed in `skipped` rather than failing the whole request.
#[derive(Debug, Default)]
pub struct BulkDeletion {
    pub results: Vec<DeleteResult>,
    pub skipped: Vec<String>,
}

impl MessageService {
    pub async fn delete_message(
        &self,
        requester: &Principal,
        message_id: Uuid,
        mode: DeleteMode,
    ) -> Result<Outcome<DeleteResult>> {
        let message = self.find_by_id(message_id).await?;
        let effect = plan_deletion(&message, requester, mode)?;
        let updated = self.mutate(message_id, effect.to_patch()).await?;

        info!(
            "{} deleted message {} ({:?})",
            requester.id, message_id, effect
        );

        let result = delete_result(&updated, requester.id);
        Ok(Outcome::new(
            result,
            vec![DomainEvent::MessageDeleted {
                message: updated,
                effect,
                requester: requester.id,
            }],
        ))
    }

    /// Apply the single-message rule to each id in turn. Each item commits on
    /// its own; malformed, unknown or forbidden ids are skipped.
    pub async fn bulk_delete(
        &self,
        requester: &Principal,
        message_ids: &[String],
        mode: DeleteMode,
    ) -> Outcome<BulkDeletion> {
        let mut out = BulkDeletion::default();
        let mut events = Vec::new();

        for raw in message_ids {
            let Ok(id) = raw.trim().parse::<Uuid>() else {
                warn!("bulk delete: skipping malformed id {:?}", raw);
                out.skipped.push(raw.clone());
                continue;
            };

            match self.delete_message(requester, id, mode).await {
                Ok(outcome) => {
                    out.results.push(outcome.value);
                    events.extend(outcome.events);
                }
                Err(e) => {
                    warn!("bulk delete: skipping {}: {}", id, e);
                    out.skipped.push(raw.clone());
                }
            }
        }

        Outcome::new(out, events)
    }
}

fn delete_result(message: &Message, requester: Uuid) -> DeleteResult {
    DeleteResult {
        message_id: message.id,
        deleted_for_sender: message.deleted_for_sender,
        deleted_for_admin: message.deleted_for_admin,
        deleted_for_me: message.deleted_for.contains(&requester),
    }
}
