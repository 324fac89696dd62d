use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_db::Database;
use parley_db::models::{MessagePatch, NewMessage};
use parley_types::api::{CreateMessageRequest, MessageView};
use parley_types::events::PinChange;
use parley_types::models::{Message, Principal};
use tracing::error;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::events::DomainEvent;
use crate::visibility::render;

/// Source of "now" for every timestamp the core writes.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The value a mutation produced plus the events it must fan out.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<DomainEvent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, events: Vec<DomainEvent>) -> Self {
        Self { value, events }
    }

    pub fn quiet(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }
}

/// Entry point for every message operation. Cheap to clone.
#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    clock: Clock,
}

impl MessageService {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_clock(db, Arc::new(Utc::now))
    }

    pub fn with_clock(db: Arc<Database>, clock: Clock) -> Self {
        Self { db, clock }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Run a blocking DB call off the async runtime.
    pub(crate) async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                CoreError::Internal(anyhow::anyhow!("storage task failed: {}", e))
            })?
            .map_err(CoreError::from)
    }

    // -- Message store --

    /// Store a new message sent by `principal`.
    pub async fn create(
        &self,
        principal: &Principal,
        req: CreateMessageRequest,
    ) -> Result<Outcome<Message>> {
        let sender_id = req
            .sender_id
            .ok_or_else(|| CoreError::Validation("senderId is required".into()))?;
        if sender_id != principal.id {
            return Err(CoreError::Authorization(
                "senderId does not match the authenticated principal".into(),
            ));
        }
        if req.content.trim().is_empty() && req.attachment_ref.is_none() {
            return Err(CoreError::Validation("message has no content".into()));
        }

        if let Some(receiver_id) = req.receiver_id {
            if receiver_id == sender_id {
                return Err(CoreError::Validation("cannot message yourself".into()));
            }
            let exists = self
                .blocking(move |db| db.principal_exists(receiver_id))
                .await?;
            if !exists {
                return Err(CoreError::NotFound(format!("receiver {}", receiver_id)));
            }
        }

        let new = NewMessage {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id: req.receiver_id,
            content: req.content,
            attachment_ref: req.attachment_ref,
            created_at: self.now(),
        };
        let message = self.blocking(move |db| db.insert_message(&new)).await?;

        Ok(Outcome::new(
            message.clone(),
            vec![DomainEvent::MessageCreated { message }],
        ))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Message> {
        self.blocking(move |db| db.get_message(id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("message {}", id)))
    }

    /// Apply a field patch, failing with `NotFound` for unknown ids.
    pub async fn mutate(&self, id: Uuid, patch: MessagePatch) -> Result<Message> {
        self.blocking(move |db| db.apply_patch(id, &patch))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("message {}", id)))
    }

    /// The viewer's conversation with `peer`, rendered for the viewer.
    /// Expired pins in the conversation are cleared first.
    pub async fn conversation(
        &self,
        viewer: &Principal,
        peer: Uuid,
    ) -> Result<Outcome<Vec<MessageView>>> {
        let viewer_id = viewer.id;
        let now = self.now();
        let (expired, messages) = self
            .blocking(move |db| {
                let expired = db.sweep_expired_pins(viewer_id, peer, now)?;
                let messages = db.get_conversation(viewer_id, peer, Some(viewer_id))?;
                Ok((expired, messages))
            })
            .await?;

        let views = messages
            .iter()
            .filter_map(|m| render(m, viewer.id, viewer.role))
            .collect();
        Ok(Outcome::new(views, pin_events(expired, PinChange::Expired)))
    }

    /// Full conversation between `a` and `b` as a moderator sees it.
    pub async fn moderation_view(
        &self,
        admin: &Principal,
        a: Uuid,
        b: Uuid,
    ) -> Result<Vec<MessageView>> {
        if !admin.is_admin() {
            return Err(CoreError::Authorization("moderation view requires admin".into()));
        }
        let messages = self.blocking(move |db| db.get_conversation(a, b, None)).await?;
        Ok(messages
            .iter()
            .filter_map(|m| render(m, admin.id, admin.role))
            .collect())
    }

    pub async fn assistant_thread(&self, viewer: &Principal) -> Result<Vec<MessageView>> {
        let viewer_id = viewer.id;
        let messages = self
            .blocking(move |db| db.get_assistant_thread(viewer_id))
            .await?;
        Ok(messages
            .iter()
            .filter_map(|m| render(m, viewer.id, viewer.role))
            .collect())
    }

    pub async fn starred(&self, viewer: &Principal) -> Result<Vec<MessageView>> {
        let viewer_id = viewer.id;
        let messages = self.blocking(move |db| db.get_starred(viewer_id)).await?;
        Ok(messages
            .iter()
            .filter(|m| m.is_participant(viewer.id))
            .filter_map(|m| render(m, viewer.id, viewer.role))
            .collect())
    }
}

pub(crate) fn pin_events(messages: Vec<Message>, change: PinChange) -> Vec<DomainEvent> {
    messages
        .into_iter()
        .map(|message| DomainEvent::PinChanged { message, change })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use parley_types::models::{Role, Visibility};
    use std::sync::Mutex;

    /// A settable clock for literal timestamp sequences.
    pub(crate) struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        pub(crate) fn set(&self, secs: i64) {
            *self.0.lock().unwrap() = t(secs);
        }
    }

    pub(crate) fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    pub(crate) fn service() -> (MessageService, TestClock) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let now = Arc::new(Mutex::new(t(0)));
        let reader = now.clone();
        let clock: Clock = Arc::new(move || *reader.lock().unwrap());
        (MessageService::with_clock(db, clock), TestClock(now))
    }

    pub(crate) fn principal(svc: &MessageService, name: &str, role: Role) -> Principal {
        let id = Uuid::new_v4();
        svc.db().create_principal(id, name, "hash", role).unwrap();
        Principal {
            id,
            username: name.into(),
            role,
            token_version: 0,
        }
    }

    pub(crate) async fn send(svc: &MessageService, from: &Principal, to: Option<&Principal>) -> Message {
        svc.create(
            from,
            CreateMessageRequest {
                sender_id: Some(from.id),
                receiver_id: to.map(|p| p.id),
                content: "hello".into(),
                attachment_ref: None,
            },
        )
        .await
        .unwrap()
        .value
    }

    #[tokio::test]
    async fn create_rejects_missing_or_foreign_sender() {
        let (svc, _) = service();
        let alice = principal(&svc, "alice", Role::User);
        let bob = principal(&svc, "bob", Role::User);

        let missing = svc
            .create(
                &alice,
                CreateMessageRequest {
                    sender_id: None,
                    receiver_id: Some(bob.id),
                    content: "hi".into(),
                    attachment_ref: None,
                },
            )
            .await;
        assert!(matches!(missing, Err(CoreError::Validation(_))));

        let spoofed = svc
            .create(
                &alice,
                CreateMessageRequest {
                    sender_id: Some(bob.id),
                    receiver_id: Some(alice.id),
                    content: "hi".into(),
                    attachment_ref: None,
                },
            )
            .await;
        assert!(matches!(spoofed, Err(CoreError::Authorization(_))));

        let unknown = svc
            .create(
                &alice,
                CreateMessageRequest {
                    sender_id: Some(alice.id),
                    receiver_id: Some(Uuid::new_v4()),
                    content: "hi".into(),
                    attachment_ref: None,
                },
            )
            .await;
        assert!(matches!(unknown, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_defaults_state_and_emits_event() {
        let (svc, clock) = service();
        let alice = principal(&svc, "alice", Role::User);
        let bob = principal(&svc, "bob", Role::User);
        clock.set(7);

        let out = svc
            .create(
                &alice,
                CreateMessageRequest {
                    sender_id: Some(alice.id),
                    receiver_id: Some(bob.id),
                    content: "hi bob".into(),
                    attachment_ref: Some("upload/1".into()),
                },
            )
            .await
            .unwrap();

        let m = &out.value;
        assert_eq!(m.created_at, t(7));
        assert!(!m.is_read && m.read_at.is_none());
        assert!(!m.deleted_for_sender && !m.deleted_for_admin && m.deleted_for.is_empty());
        assert!(!m.is_pinned && m.starred_by.is_empty());
        assert!(matches!(&out.events[..], [DomainEvent::MessageCreated { .. }]));
    }

    #[tokio::test]
    async fn find_and_mutate_unknown_ids_fail_not_found() {
        let (svc, _) = service();
        assert!(matches!(
            svc.find_by_id(Uuid::new_v4()).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            svc.mutate(Uuid::new_v4(), MessagePatch::default()).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn moderation_view_requires_admin_and_shows_placeholders() {
        let (svc, _) = service();
        let alice = principal(&svc, "alice", Role::User);
        let bob = principal(&svc, "bob", Role::User);
        let admin = principal(&svc, "mod", Role::Admin);
        let m = send(&svc, &alice, Some(&bob)).await;
        svc.mutate(
            m.id,
            MessagePatch {
                deleted_for_admin: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            svc.moderation_view(&alice, alice.id, bob.id).await,
            Err(CoreError::Authorization(_))
        ));
        let view = svc.moderation_view(&admin, alice.id, bob.id).await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].visibility, Visibility::HiddenByModerator);
        assert!(svc.conversation(&bob, alice.id).await.unwrap().value.is_empty());
    }
}
