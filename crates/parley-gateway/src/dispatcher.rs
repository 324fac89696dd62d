use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::{Principal, Role};

/// One live WebSocket connection of a principal.
struct ConnectionEntry {
    conn_id: Uuid,
    role: Role,
    token_version: i64,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Returned by [`Dispatcher::register_connection`].
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub rx: mpsc::UnboundedReceiver<GatewayEvent>,
    /// True if this connection took the principal from offline to online.
    pub came_online: bool,
}

/// Session registry: maps principals to their live connections, tracks the
/// online/offline edge, and routes events. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events (status changes); every
    /// connection receives everything sent here
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// principal_id -> live connections. The entry exists iff the principal is online.
    connections: RwLock<HashMap<Uuid, Vec<ConnectionEntry>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Add a connection for `principal`. On the 0 -> 1 edge the principal is
    /// marked online and a status change is broadcast.
    pub async fn register_connection(&self, principal: &Principal) -> ConnectionHandle {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let came_online = {
            let mut connections = self.inner.connections.write().await;
            let entries = connections.entry(principal.id).or_default();
            entries.push(ConnectionEntry {
                conn_id,
                role: principal.role,
                token_version: principal.token_version,
                tx,
            });
            entries.len() == 1
        };

        if came_online {
            info!("{} ({}) is online", principal.username, principal.id);
            self.broadcast(GatewayEvent::UserStatusChange {
                user_id: principal.id,
                online: true,
                last_seen: None,
            });
        }

        ConnectionHandle {
            conn_id,
            rx,
            came_online,
        }
    }

    /// Remove one connection. On the 1 -> 0 edge the principal is marked
    /// offline, a status change is broadcast, and the `last_seen` stamp is
    /// returned for persisting.
    pub async fn deregister_connection(&self, principal_id: Uuid, conn_id: Uuid) -> Option<DateTime<Utc>> {
        let went_offline = {
            let mut connections = self.inner.connections.write().await;
            let Some(entries) = connections.get_mut(&principal_id) else {
                return None;
            };
            let before = entries.len();
            entries.retain(|e| e.conn_id != conn_id);
            if entries.len() == before {
                // Already removed
                return None;
            }
            if entries.is_empty() {
                connections.remove(&principal_id);
                true
            } else {
                false
            }
        };

        if !went_offline {
            return None;
        }

        let last_seen = Utc::now();
        info!("{} is offline", principal_id);
        self.broadcast(GatewayEvent::UserStatusChange {
            user_id: principal_id,
            online: false,
            last_seen: Some(last_seen),
        });
        Some(last_seen)
    }

    /// Deliver to every connection of one principal. Silently dropped if
    /// they have none. Returns the number of connections reached.
    pub async fn route_to_principal(&self, principal_id: Uuid, event: GatewayEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let delivered = connections
            .get(&principal_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.tx.send(event.clone()).is_ok())
                    .count()
            })
            .unwrap_or(0);
        debug!("routed to principal {}: {} connections", principal_id, delivered);
        delivered
    }

    /// Deliver to every connection whose principal has `role`.
    pub async fn route_to_role(&self, role: Role, event: GatewayEvent) -> usize {
        let connections = self.inner.connections.read().await;
        let delivered = connections
            .values()
            .flatten()
            .filter(|e| e.role == role)
            .filter(|e| e.tx.send(event.clone()).is_ok())
            .count();
        debug!("routed to role {}: {} connections", role, delivered);
        delivered
    }

    /// Tell connections opened under a credential older than `current_version`
    /// that they have been superseded. Returns how many were notified.
    pub async fn invalidate_sessions(&self, principal_id: Uuid, current_version: i64) -> usize {
        let connections = self.inner.connections.read().await;
        let Some(entries) = connections.get(&principal_id) else {
            return 0;
        };
        entries
            .iter()
            .filter(|e| e.token_version < current_version)
            .filter(|e| {
                e.tx
                    .send(GatewayEvent::SessionInvalidated {
                        token_version: current_version,
                    })
                    .is_ok()
            })
            .count()
    }

    pub async fn connection_count(&self, principal_id: Uuid) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&principal_id)
            .map_or(0, Vec::len)
    }

    /// Principals with at least one live connection.
    pub async fn online_principals(&self) -> Vec<Uuid> {
        self.inner.connections.read().await.keys().copied().collect()
    }

    /// Drop every connection entry. Called at shutdown.
    pub async fn clear(&self) {
        self.inner.connections.write().await.clear();
    }
}
