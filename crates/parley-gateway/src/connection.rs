use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use parley_core::credentials::Credentials;
use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::Principal;

use crate::dispatcher::{ConnectionHandle, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a client has to send `identify` after connecting without a token.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Handle a WebSocket whose credential was checked at the HTTP upgrade.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    principal: Principal,
) {
    let (sender, receiver) = socket.split();
    info!("{} ({}) connected to gateway (pre-authenticated)", principal.username, principal.id);
    run_connection_loop(sender, receiver, dispatcher, db, principal).await;
}

/// Handle a WebSocket opened without a credential: the first frame must be
/// an `identify` command carrying one.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    credentials: Credentials,
) {
    let (mut sender, mut receiver) = socket.split();

    let principal = match wait_for_identify(&mut receiver, &db, &credentials).await {
        Ok(principal) => principal,
        Err(reason) => {
            warn!("WebSocket client failed to identify: {}", reason);
            let _ = send_event(&mut sender, &GatewayEvent::Error { message: reason }).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", principal.username, principal.id);
    run_connection_loop(sender, receiver, dispatcher, db, principal).await;
}

async fn run_connection_loop(
    mut sender: WsSink,
    mut receiver: WsStream,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    principal: Principal,
) {
    let mut handle = match register_current(&dispatcher, &db, &principal).await {
        Ok(handle) => handle,
        Err(refusal) => {
            warn!("{} ({}) refused at registration", principal.username, principal.id);
            let _ = send_event(&mut sender, &refusal).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let conn_id = handle.conn_id;
    let mut broadcast_rx = dispatcher.subscribe();

    let ready = GatewayEvent::Ready {
        user_id: principal.id,
        username: principal.username.clone(),
        role: principal.role,
        online_users: dispatcher.online_principals().await,
    };

    if send_event(&mut sender, &ready).await {
        let pong_received = Arc::new(AtomicBool::new(true));
        let pong_flag_send = pong_received.clone();
        let pong_flag_recv = pong_received;

        // Forward status broadcasts + targeted events -> client, with heartbeat
        let mut send_task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut missed_heartbeats: u8 = 0;

            loop {
                tokio::select! {
                    result = broadcast_rx.recv() => {
                        let event = match result {
                            Ok(event) => event,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Broadcast receiver lagged by {} events", n);
                                continue;
                            }
                            Err(_) => break,
                        };
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    result = handle.rx.recv() => {
                        let Some(event) = result else { break };
                        let superseded = matches!(event, GatewayEvent::SessionInvalidated { .. });
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                        if superseded {
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    _ = heartbeat.tick() => {
                        if pong_flag_send.swap(false, Ordering::Acquire) {
                            missed_heartbeats = 0;
                        } else {
                            missed_heartbeats += 1;
                            if missed_heartbeats >= 2 {
                                warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                                break;
                            }
                        }
                        if sender.send(Message::Ping(vec![].into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Clients only talk over REST after the handshake; the socket
        // carries pongs and close frames.
        let principal_id = principal.id;
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(GatewayCommand::Identify { .. }) => {
                            debug!("{} sent identify on an established connection", principal_id);
                        }
                        Err(e) => {
                            warn!(
                                "{} bad command: {} -- raw: {}",
                                principal_id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                        }
                    },
                    Message::Pong(_) => {
                        pong_flag_recv.store(true, Ordering::Release);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        // Wait for either task to finish
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }
    }

    if let Some(last_seen) = dispatcher.deregister_connection(principal.id, conn_id).await {
        let id = principal.id;
        let result = tokio::task::spawn_blocking(move || db.touch_last_seen(id, last_seen)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("failed to persist last_seen for {}: {}", id, e),
            Err(e) => error!("spawn_blocking join error: {}", e),
        }
    }
    info!("{} ({}) disconnected from gateway", principal.username, principal.id);
}

/// Register `principal` and then confirm its credential is still the stored
/// one. A login that commits between authentication and registration finds
/// no entry to invalidate, so the re-read here is what refuses it. The error
/// is the event sent to the client before closing.
pub(crate) async fn register_current(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    principal: &Principal,
) -> Result<ConnectionHandle, GatewayEvent> {
    let handle = dispatcher.register_connection(principal).await;

    let id = principal.id;
    let stored = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || db.get_principal_by_id(id)).await
    };
    let refusal = match stored {
        Ok(Ok(Some(row))) if row.token_version == principal.token_version => return Ok(handle),
        Ok(Ok(Some(row))) => GatewayEvent::SessionInvalidated {
            token_version: row.token_version,
        },
        Ok(Ok(None)) => GatewayEvent::Error {
            message: "principal no longer exists".into(),
        },
        Ok(Err(e)) => {
            error!("failed to re-check token version for {}: {}", id, e);
            GatewayEvent::Error {
                message: "internal error".into(),
            }
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            GatewayEvent::Error {
                message: "internal error".into(),
            }
        }
    };

    dispatcher.deregister_connection(id, handle.conn_id).await;
    Err(refusal)
}

/// Wait for an `identify` frame and check its credential. The error is the
/// reason sent back to the client.
async fn wait_for_identify<S, E>(
    receiver: &mut S,
    db: &Arc<Database>,
    credentials: &Credentials,
) -> Result<Principal, String>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    let token = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    return match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(GatewayCommand::Identify { token }) => Ok(token),
                        Err(_) => Err("expected identify command".to_string()),
                    };
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err("connection closed before identify".to_string())
    })
    .await
    .map_err(|_| "identify timed out".to_string())??;

    credentials
        .authenticate(db, &token)
        .await
        .map_err(|e| e.to_string())
}

/// Serialize and send one event. Returns false if the socket is gone.
async fn send_event(sender: &mut WsSink, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
