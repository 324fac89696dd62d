use parley_db::models::MessagePatch;
use parley_types::api::MessageView;
use parley_types::events::PinChange;
use parley_types::models::{Message, PinDuration, Principal};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::events::DomainEvent;
use crate::service::{MessageService, Outcome, pin_events};
use crate::visibility::render;

impl MessageService {
    /// Pin a peer message. Expired pins in the conversation are cleared and,
    /// if the ceiling is still reached, the oldest pins are evicted so that
    /// the new pin always succeeds.
    pub async fn pin(
        &self,
        requester: &Principal,
        message_id: Uuid,
        duration: PinDuration,
    ) -> Result<Outcome<Message>> {
        let message = self.find_by_id(message_id).await?;
        ensure_pinnable(&message, requester)?;

        let now = self.now();
        let expires_at = duration.expires_at(now);
        let pinned_by = requester.id;
        let outcome = self
            .blocking(move |db| db.pin_message(message_id, pinned_by, expires_at, now))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("message {}", message_id)))?;

        info!(
            "{} pinned message {} (expired {}, evicted {})",
            requester.id,
            message_id,
            outcome.expired.len(),
            outcome.evicted.len()
        );

        let mut events = pin_events(outcome.expired, PinChange::Expired);
        events.extend(pin_events(outcome.evicted, PinChange::Evicted));
        events.push(DomainEvent::PinChanged {
            message: outcome.message.clone(),
            change: PinChange::Pinned,
        });

        Ok(Outcome::new(outcome.message, events))
    }

    pub async fn unpin(&self, requester: &Principal, message_id: Uuid) -> Result<Outcome<Message>> {
        let message = self.find_by_id(message_id).await?;
        ensure_pinnable(&message, requester)?;

        let updated = self
            .mutate(
                message_id,
                MessagePatch {
                    clear_pin: true,
                    ..Default::default()
                },
            )
            .await?;

        Ok(Outcome::new(
            updated.clone(),
            vec![DomainEvent::PinChanged {
                message: updated,
                change: PinChange::Unpinned,
            }],
        ))
    }

    /// Add or remove the requester's personal star. Idempotent.
    pub async fn star(
        &self,
        requester: &Principal,
        message_id: Uuid,
        value: bool,
    ) -> Result<Outcome<Message>> {
        let message = self.find_by_id(message_id).await?;
        if !message.is_participant(requester.id) {
            return Err(CoreError::Authorization(format!(
                "{} is not a participant of message {}",
                requester.id, message_id
            )));
        }
        ensure_visible(&message, requester)?;

        let updated = self
            .mutate(
                message_id,
                MessagePatch {
                    star: Some((requester.id, value)),
                    ..Default::default()
                },
            )
            .await?;

        Ok(Outcome::new(
            updated,
            vec![DomainEvent::MessageStarred {
                message_id,
                principal_id: requester.id,
                starred: value,
            }],
        ))
    }

    /// Active pins between the viewer and `peer`, oldest first.
    pub async fn active_pins(
        &self,
        viewer: &Principal,
        peer: Uuid,
    ) -> Result<Outcome<Vec<MessageView>>> {
        let viewer_id = viewer.id;
        let now = self.now();
        let (expired, pins) = self
            .blocking(move |db| {
                let expired = db.sweep_expired_pins(viewer_id, peer, now)?;
                let pins = db.get_active_pins(viewer_id, peer, now)?;
                Ok((expired, pins))
            })
            .await?;

        let views = pins
            .iter()
            .filter_map(|m| render(m, viewer.id, viewer.role))
            .collect();
        Ok(Outcome::new(views, pin_events(expired, PinChange::Expired)))
    }

    /// Clear expired pins across all conversations.
    pub async fn sweep_expired_pins(&self) -> Result<Outcome<usize>> {
        let now = self.now();
        let expired = self.blocking(move |db| db.sweep_all_expired_pins(now)).await?;
        if !expired.is_empty() {
            debug!("pin sweep cleared {} expired pins", expired.len());
        }
        Ok(Outcome::new(expired.len(), pin_events(expired, PinChange::Expired)))
    }
}

fn ensure_pinnable(message: &Message, requester: &Principal) -> Result<()> {
    if message.is_assistant_directed() {
        return Err(CoreError::Validation(
            "assistant messages cannot be pinned".into(),
        ));
    }
    if !message.is_participant(requester.id) && !requester.is_admin() {
        return Err(CoreError::Authorization(format!(
            "{} is not a participant of message {}",
            requester.id, message.id
        )));
    }
    ensure_visible(message, requester)
}

/// A message the requester cannot see is reported as missing before anything
/// is written.
fn ensure_visible(message: &Message, requester: &Principal) -> Result<()> {
    match render(message, requester.id, requester.role) {
        Some(_) => Ok(()),
        None => Err(CoreError::NotFound(format!("message {}", message.id))),
    }
}
