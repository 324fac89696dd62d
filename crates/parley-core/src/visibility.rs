use parley_db::models::MessagePatch;
use parley_types::api::{MessageView, Placeholder};
use parley_types::models::{DeleteMode, Message, Principal, Role, Visibility};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Derive how `message` appears to `viewer` from its stored flags.
///
/// Precedence: moderator hide, then viewer-local hide, then sender placeholder.
pub fn visibility_for(message: &Message, viewer: Uuid) -> Visibility {
    if message.deleted_for_admin {
        Visibility::HiddenByModerator
    } else if message.deleted_for.contains(&viewer) {
        Visibility::HiddenForViewer
    } else if message.deleted_for_sender {
        Visibility::PlaceholderDeletedBySender
    } else {
        Visibility::Visible
    }
}

/// Render a message for one viewer, or `None` if it is hard hidden for them.
///
/// Admins see moderator-hidden messages as placeholders; everyone else never
/// sees them at all.
pub fn render(message: &Message, viewer: Uuid, role: Role) -> Option<MessageView> {
    let visibility = visibility_for(message, viewer);
    let placeholder = match visibility {
        Visibility::Visible => None,
        Visibility::PlaceholderDeletedBySender => Some(Placeholder::DeletedBySender),
        Visibility::HiddenByModerator if role == Role::Admin => Some(Placeholder::RemovedByModerator),
        Visibility::HiddenByModerator | Visibility::HiddenForViewer => return None,
    };

    let content = placeholder.is_none().then(|| message.content.clone());
    let attachment_ref = if placeholder.is_none() {
        message.attachment_ref.clone()
    } else {
        None
    };

    Some(MessageView {
        id: message.id,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        content,
        attachment_ref,
        placeholder,
        visibility,
        created_at: message.created_at,
        is_read: message.is_read,
        read_at: message.read_at,
        is_pinned: message.is_pinned,
        pinned_at: message.pinned_at,
        pin_expires_at: message.pin_expires_at,
        pinned_by: message.pinned_by,
        is_starred: message.starred_by.contains(&viewer),
    })
}

/// What a delete request does to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionEffect {
    /// Admin hide, independent of participants' wishes
    HideByModerator,
    /// Sender chose "delete for everyone"; participants see a placeholder
    DeleteForEveryone,
    /// One viewer removed the message from their own view
    DeleteForViewer(Uuid),
}

impl DeletionEffect {
    pub fn to_patch(self) -> MessagePatch {
        match self {
            DeletionEffect::HideByModerator => MessagePatch {
                deleted_for_admin: Some(true),
                ..Default::default()
            },
            DeletionEffect::DeleteForEveryone => MessagePatch {
                deleted_for_sender: Some(true),
                ..Default::default()
            },
            DeletionEffect::DeleteForViewer(viewer) => MessagePatch {
                hide_for: Some(viewer),
                ..Default::default()
            },
        }
    }
}

/// Decide what `requester` deleting `message` with `mode` means.
///
/// Admins always hide as moderators regardless of `mode`. Senders may delete
/// for themselves or for everyone; receivers only for themselves.
pub fn plan_deletion(message: &Message, requester: &Principal, mode: DeleteMode) -> Result<DeletionEffect> {
    if requester.is_admin() {
        return Ok(DeletionEffect::HideByModerator);
    }

    let is_sender = message.sender_id == requester.id;
    let is_receiver = message.receiver_id == Some(requester.id);

    match (mode, is_sender, is_receiver) {
        (DeleteMode::Everyone, true, _) => Ok(DeletionEffect::DeleteForEveryone),
        (DeleteMode::Me, true, _) | (DeleteMode::Me, _, true) => {
            Ok(DeletionEffect::DeleteForViewer(requester.id))
        }
        (DeleteMode::Everyone, false, true) => Err(CoreError::Authorization(
            "only the sender can delete a message for everyone".into(),
        )),
        _ => Err(CoreError::Authorization(format!(
            "{} is not a participant of message {}",
            requester.id, message.id
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    pub(crate) fn user(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            username: "someone".into(),
            role,
            token_version: 1,
        }
    }

    fn message(sender: Uuid, receiver: Option<Uuid>) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            content: "hello".into(),
            attachment_ref: Some("blob-1".into()),
            created_at: Utc::now(),
            is_read: false,
            read_at: None,
            read_batch: None,
            deleted_for_sender: false,
            deleted_for_admin: false,
            deleted_for: BTreeSet::new(),
            is_pinned: false,
            pinned_at: None,
            pin_expires_at: None,
            pinned_by: None,
            starred_by: BTreeSet::new(),
        }
    }

    #[test]
    fn sender_placeholder_is_still_returned() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut m = message(a, Some(b));
        m.deleted_for_sender = true;

        let view = render(&m, b, Role::User).unwrap();
        assert_eq!(view.visibility, Visibility::PlaceholderDeletedBySender);
        assert_eq!(view.placeholder, Some(Placeholder::DeletedBySender));
        assert!(view.content.is_none());
        assert!(view.attachment_ref.is_none());
    }

    #[test]
    fn viewer_hide_wins_over_placeholder() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut m = message(a, Some(b));
        m.deleted_for_sender = true;
        m.deleted_for.insert(b);

        assert_eq!(visibility_for(&m, b), Visibility::HiddenForViewer);
        assert!(render(&m, b, Role::User).is_none());
        assert!(render(&m, a, Role::User).is_some());
    }

    #[test]
    fn moderator_hide_takes_precedence_for_everyone() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut m = message(a, Some(b));
        m.deleted_for_admin = true;
        m.deleted_for_sender = true;

        assert_eq!(visibility_for(&m, a), Visibility::HiddenByModerator);
        assert!(render(&m, a, Role::User).is_none());
        assert!(render(&m, b, Role::User).is_none());

        let admin_view = render(&m, Uuid::new_v4(), Role::Admin).unwrap();
        assert_eq!(admin_view.placeholder, Some(Placeholder::RemovedByModerator));
        assert!(admin_view.content.is_none());
    }

    #[test]
    fn starred_projection_is_per_viewer() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut m = message(a, Some(b));
        m.starred_by.insert(a);

        assert!(render(&m, a, Role::User).unwrap().is_starred);
        assert!(!render(&m, b, Role::User).unwrap().is_starred);
    }

    #[test]
    fn deletion_matrix() {
        let sender = user(Role::User);
        let receiver = user(Role::User);
        let stranger = user(Role::User);
        let admin = user(Role::Admin);
        let m = message(sender.id, Some(receiver.id));

        assert_eq!(
            plan_deletion(&m, &sender, DeleteMode::Everyone).unwrap(),
            DeletionEffect::DeleteForEveryone
        );
        assert_eq!(
            plan_deletion(&m, &sender, DeleteMode::Me).unwrap(),
            DeletionEffect::DeleteForViewer(sender.id)
        );
        assert_eq!(
            plan_deletion(&m, &receiver, DeleteMode::Me).unwrap(),
            DeletionEffect::DeleteForViewer(receiver.id)
        );
        assert!(matches!(
            plan_deletion(&m, &receiver, DeleteMode::Everyone),
            Err(CoreError::Authorization(_))
        ));
        assert!(matches!(
            plan_deletion(&m, &stranger, DeleteMode::Me),
            Err(CoreError::Authorization(_))
        ));
        for mode in [DeleteMode::Me, DeleteMode::Everyone] {
            assert_eq!(
                plan_deletion(&m, &admin, mode).unwrap(),
                DeletionEffect::HideByModerator
            );
        }
    }

    #[test]
    fn moderator_patch_never_touches_deleted_for() {
        let patch = DeletionEffect::HideByModerator.to_patch();
        assert_eq!(patch.deleted_for_admin, Some(true));
        assert!(patch.hide_for.is_none());
        assert!(patch.deleted_for_sender.is_none());
    }
}
