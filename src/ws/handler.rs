//! WebSocket connection handlers.

use super::connection::{OutgoingMessage, WsConnection};
use super::protocol::{decode_client_message, ClientMessage, ServerMessage};
use super::room::RoomManager;
use crate::presence::PresenceTracker;
use crate::room::room_key;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Keep-alive ping interval (30 seconds)
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout for considering a connection dead (90 seconds = 3 missed pings)
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// WebSocket state shared across handlers.
#[derive(Clone)]
pub struct WsState {
    pub room_manager: Arc<RoomManager>,
    pub presence: Arc<PresenceTracker>,
}

/// The connection's current room membership. At most one per connection;
/// used to clean up presence when the socket drops without a `leave`.
struct RoomBinding {
    room: String,
    user_id: String,
}

/// Handle WebSocket upgrade request.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: WsState) {
    // Create channel for outgoing messages (bounded for backpressure)
    let (tx, mut rx) = mpsc::channel::<OutgoingMessage>(256);
    let conn = Arc::new(WsConnection::new(tx));
    let conn_id = conn.id.clone();

    info!(conn_id = %conn_id, "WebSocket connected");

    let mut binding: Option<RoomBinding> = None;
    let mut last_activity = Instant::now();

    // Keep-alive ping interval
    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Main loop: handle incoming and outgoing messages
    loop {
        tokio::select! {
            // Handle outgoing messages from channel
            Some(msg) = rx.recv() => {
                let ws_msg = match msg {
                    OutgoingMessage::Text(text) => Message::Text(text),
                    OutgoingMessage::Close => {
                        let _ = socket.close().await;
                        break;
                    }
                };
                if let Err(e) = socket.send(ws_msg).await {
                    debug!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }

            // Keep-alive ping
            _ = ping_interval.tick() => {
                if last_activity.elapsed() > CONNECTION_TIMEOUT {
                    warn!(conn_id = %conn_id, "Connection timed out (no activity for {:?})", CONNECTION_TIMEOUT);
                    let _ = socket.close().await;
                    break;
                }

                if let Err(e) = socket.send(Message::Ping(vec![])).await {
                    debug!(conn_id = %conn_id, "Failed to send ping: {}", e);
                    break;
                }
            }

            // Handle incoming messages
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        handle_client_message(&state, &conn, &mut binding, &text).await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled automatically by axum
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(conn_id = %conn_id, "Client initiated close");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // Protocol is text frames only
                        debug!(conn_id = %conn_id, "Dropping unexpected binary frame");
                    }
                    Some(Err(e)) => {
                        error!(conn_id = %conn_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(conn_id = %conn_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Network drop without a leave message is treated exactly like a leave
    // for the connection's last-known room.
    if let Some(bound) = binding.take() {
        leave_room(&state, &conn_id, &bound.room, &bound.user_id).await;
    }

    info!(conn_id = %conn_id, "WebSocket disconnected");
    state.room_manager.cleanup_empty_rooms().await;
}

/// Dispatch one client frame. Malformed frames are dropped; the connection
/// stays open. Frames referencing rooms with no members are no-ops.
async fn handle_client_message(
    state: &WsState,
    conn: &Arc<WsConnection>,
    binding: &mut Option<RoomBinding>,
    text: &str,
) {
    let Some(msg) = decode_client_message(text) else {
        debug!(conn_id = %conn.id, "Dropping malformed message");
        return;
    };

    match msg {
        ClientMessage::Join {
            user_id,
            org_id,
            note_id,
        } => {
            let key = room_key(&org_id, &note_id);

            // Rebinding to a different room implies leaving the old one.
            if let Some(old) = binding.take() {
                if old.room != key {
                    leave_room(state, &conn.id, &old.room, &old.user_id).await;
                }
            }

            let room = state.room_manager.get_or_create_room(&key).await;
            room.add_connection(conn.clone()).await;
            state.presence.touch(&key, &user_id).await;
            let outcome = state.presence.prune(&key).await;

            debug!(conn_id = %conn.id, room = %key, user_id = %user_id, count = outcome.count, "join");
            room.broadcast_all(&ServerMessage::PresenceUpdate {
                room: key.clone(),
                count: outcome.count,
            })
            .await;

            *binding = Some(RoomBinding { room: key, user_id });
        }

        ClientMessage::Heartbeat {
            user_id,
            org_id,
            note_id,
        } => {
            let key = room_key(&org_id, &note_id);
            state.presence.touch(&key, &user_id).await;
            let outcome = state.presence.prune(&key).await;

            if let Some(room) = state.room_manager.get_room(&key).await {
                room.broadcast_all(&ServerMessage::PresenceUpdate {
                    room: key,
                    count: outcome.count,
                })
                .await;
            }
        }

        ClientMessage::ContentUpdate {
            user_id,
            org_id,
            note_id,
            content,
        } => {
            let key = room_key(&org_id, &note_id);

            // A content message also counts as activity for presence.
            let inserted = state.presence.touch(&key, &user_id).await;
            let outcome = state.presence.prune(&key).await;

            let Some(room) = state.room_manager.get_room(&key).await else {
                return;
            };

            room.broadcast_except(
                &conn.id,
                &ServerMessage::ContentPatch {
                    room: key.clone(),
                    user_id,
                    content,
                },
            )
            .await;

            // Only re-announce the count when membership actually changed.
            if inserted || outcome.removed > 0 {
                room.broadcast_all(&ServerMessage::PresenceUpdate {
                    room: key,
                    count: outcome.count,
                })
                .await;
            }
        }

        ClientMessage::Leave {
            user_id,
            org_id,
            note_id,
        } => {
            let key = room_key(&org_id, &note_id);
            leave_room(state, &conn.id, &key, &user_id).await;

            if binding.as_ref().is_some_and(|b| b.room == key) {
                *binding = None;
            }
        }

        ClientMessage::Unknown => {
            debug!(conn_id = %conn.id, "Dropping message with unrecognized type");
        }
    }
}

/// Remove a participant from a room and announce the new count to whoever
/// remains. Shared by explicit `leave` and disconnect cleanup.
async fn leave_room(state: &WsState, conn_id: &str, key: &str, user_id: &str) {
    state.presence.remove(key, user_id).await;
    let outcome = state.presence.prune(key).await;

    if let Some(room) = state.room_manager.get_room(key).await {
        room.remove_connection(conn_id).await;
        debug!(conn_id = %conn_id, room = %key, user_id = %user_id, count = outcome.count, "leave");
        room.broadcast_all(&ServerMessage::PresenceUpdate {
            room: key.to_string(),
            count: outcome.count,
        })
        .await;
    }
}
