//! Turns domain events into per-principal gateway deliveries.
//!
//! [`plan`] is pure so the routing rules can be checked without sockets;
//! [`Dispatcher::dispatch`] executes a plan against live connections.

use parley_core::DomainEvent;
use parley_core::visibility::{DeletionEffect, render};
use parley_types::events::GatewayEvent;
use parley_types::models::{Message, Role};
use tracing::trace;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Principal(Uuid),
    Role(Role),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub event: GatewayEvent,
}

/// Compute the deliveries for one domain event: one per affected principal,
/// plus role-scoped alerts where moderation is involved.
pub fn plan(event: &DomainEvent) -> Vec<Delivery> {
    match event {
        DomainEvent::MessageCreated { message } => message
            .participants()
            .into_iter()
            .filter_map(|pid| {
                render(message, pid, Role::User).map(|view| Delivery {
                    target: Target::Principal(pid),
                    event: GatewayEvent::MessageCreated { message: view },
                })
            })
            .collect(),

        DomainEvent::MessageDeleted {
            message,
            effect,
            requester,
        } => match effect {
            DeletionEffect::DeleteForViewer(viewer) => {
                vec![to_principal(*viewer, deleted_event(message, *viewer))]
            }
            DeletionEffect::DeleteForEveryone => message
                .participants()
                .into_iter()
                .map(|pid| to_principal(pid, deleted_event(message, pid)))
                .collect(),
            DeletionEffect::HideByModerator => {
                let mut deliveries: Vec<Delivery> = message
                    .participants()
                    .into_iter()
                    .map(|pid| to_principal(pid, deleted_event(message, pid)))
                    .collect();
                deliveries.push(Delivery {
                    target: Target::Role(Role::Admin),
                    event: GatewayEvent::ModerationAlert {
                        message_id: message.id,
                        moderator_id: *requester,
                        sender_id: message.sender_id,
                        receiver_id: message.receiver_id,
                    },
                });
                deliveries
            }
        },

        DomainEvent::PinChanged { message, change } => {
            let event = GatewayEvent::MessagePinned {
                message_id: message.id,
                is_pinned: message.is_pinned,
                pinned_at: message.pinned_at,
                pin_expires_at: message.pin_expires_at,
                pinned_by: message.pinned_by,
                reason: *change,
            };
            // Participants who can no longer see the message hear nothing about it.
            message
                .participants()
                .into_iter()
                .filter(|pid| render(message, *pid, Role::User).is_some())
                .map(|pid| to_principal(pid, event.clone()))
                .collect()
        }

        DomainEvent::MessageStarred {
            message_id,
            principal_id,
            starred,
        } => vec![to_principal(
            *principal_id,
            GatewayEvent::MessageStarred {
                message_id: *message_id,
                is_starred: *starred,
            },
        )],

        DomainEvent::MessagesRead {
            reader_id,
            sender_id,
            batch_id,
            read_at,
            message_ids,
        } => {
            let event = GatewayEvent::MessagesRead {
                reader_id: *reader_id,
                sender_id: *sender_id,
                read_at: *read_at,
                batch_id: *batch_id,
                message_ids: message_ids.clone(),
            };
            distinct(&[*sender_id, *reader_id])
                .into_iter()
                .map(|pid| to_principal(pid, event.clone()))
                .collect()
        }

        DomainEvent::MessagesUnread {
            reader_id,
            target_id,
            message_ids,
        } => {
            let event = GatewayEvent::MessagesUnread {
                reader_id: *reader_id,
                target_id: *target_id,
                message_ids: message_ids.clone(),
            };
            distinct(&[*target_id, *reader_id])
                .into_iter()
                .map(|pid| to_principal(pid, event.clone()))
                .collect()
        }
    }
}

fn to_principal(pid: Uuid, event: GatewayEvent) -> Delivery {
    Delivery {
        target: Target::Principal(pid),
        event,
    }
}

fn deleted_event(message: &Message, viewer: Uuid) -> GatewayEvent {
    GatewayEvent::MessageDeleted {
        message_id: message.id,
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        deleted_for_sender: message.deleted_for_sender,
        deleted_for_admin: message.deleted_for_admin,
        deleted_for_me: message.deleted_for.contains(&viewer),
    }
}

fn distinct(ids: &[Uuid]) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

impl Dispatcher {
    /// Deliver one domain event to every affected connection.
    pub async fn dispatch(&self, event: &DomainEvent) {
        for delivery in plan(event) {
            let reached = match delivery.target {
                Target::Principal(pid) => self.route_to_principal(pid, delivery.event).await,
                Target::Role(role) => self.route_to_role(role, delivery.event).await,
            };
            trace!("{} -> {:?}: {} connections", event.name(), delivery.target, reached);
        }
    }

    /// Deliver events in order. Order matters per message: creation before deletion.
    pub async fn dispatch_all(&self, events: &[DomainEvent]) {
        for event in events {
            self.dispatch(event).await;
        }
    }
}
