//! Per-editing-session sync agent.
//!
//! Joins the room for its note, debounces local edits before broadcasting
//! them as full-document snapshots, applies remote snapshots from peers, and
//! tracks the live participant count. Without a configured relay endpoint
//! (or when the connect fails) the agent degrades to single-user mode: edits
//! are accepted and dropped, the peer count stays at 1, and nothing errors.
//!
//! Echo suppression is a timed heuristic, not a correctness guarantee: after
//! applying a remote snapshot, local edit events are ignored for a short
//! guard window so the applied content is not bounced back as a fresh edit.
//! Under fast concurrent typing from two peers, updates can still be lost —
//! the last snapshot delivered wins.

use crate::room::room_key;
use crate::ws::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Debounce window for local edits.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// How long after applying a remote snapshot local edit events are ignored.
/// Must cover at least the debounce window.
const ECHO_GUARD: Duration = Duration::from_millis(300);

/// Presence heartbeat interval; well under the relay's 20-second staleness
/// window.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for one editing session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Relay websocket URL (e.g. `ws://127.0.0.1:8080/ws`). `None` means
    /// single-user mode.
    pub endpoint: Option<String>,
    pub user_id: String,
    pub org_id: String,
    pub note_id: String,
    pub debounce: Duration,
}

impl SyncConfig {
    pub fn new(
        endpoint: Option<String>,
        user_id: impl Into<String>,
        org_id: impl Into<String>,
        note_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            user_id: user_id.into(),
            org_id: org_id.into(),
            note_id: note_id.into(),
            debounce: DEBOUNCE,
        }
    }
}

/// A snapshot received from a peer, to be applied to the local document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEdit {
    pub from_user_id: String,
    pub content: String,
}

enum Command {
    Send(String),
    Close,
}

pub struct SyncAgent {
    room: String,
    /// `None` in single-user mode.
    cmd_tx: Option<mpsc::Sender<Command>>,
    peers_rx: watch::Receiver<usize>,
    remote_rx: Option<mpsc::Receiver<RemoteEdit>>,
    pending_send: Mutex<Option<JoinHandle<()>>>,
    last_remote_applied: Arc<Mutex<Option<Instant>>>,
    debounce: Duration,
}

impl SyncAgent {
    /// Open a session: connect to the relay and join the note's room, or
    /// degrade to single-user mode when no endpoint is configured or the
    /// connect fails.
    pub async fn connect(config: SyncConfig) -> Self {
        let room = room_key(&config.org_id, &config.note_id);
        let (peers_tx, peers_rx) = watch::channel(1usize);

        let Some(endpoint) = config.endpoint.clone() else {
            debug!(room = %room, "No relay endpoint configured, running single-user");
            return Self::solo(room, peers_rx, config.debounce);
        };

        let stream = match connect_async(endpoint.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(room = %room, "Relay unreachable ({}), running single-user", e);
                return Self::solo(room, peers_rx, config.debounce);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (remote_tx, remote_rx) = mpsc::channel(64);
        let last_remote_applied = Arc::new(Mutex::new(None));

        let io = IoTask {
            config: config.clone(),
            room: room.clone(),
            peers_tx,
            remote_tx,
            last_remote_applied: last_remote_applied.clone(),
        };
        tokio::spawn(io.run(stream, cmd_rx));

        info!(room = %room, user_id = %config.user_id, "Sync session connected");
        Self {
            room,
            cmd_tx: Some(cmd_tx),
            peers_rx,
            remote_rx: Some(remote_rx),
            pending_send: Mutex::new(None),
            last_remote_applied,
            debounce: config.debounce,
        }
    }

    fn solo(room: String, peers_rx: watch::Receiver<usize>, debounce: Duration) -> Self {
        Self {
            room,
            cmd_tx: None,
            peers_rx,
            remote_rx: None,
            pending_send: Mutex::new(None),
            last_remote_applied: Arc::new(Mutex::new(None)),
            debounce,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether a relay connection was established.
    pub fn is_connected(&self) -> bool {
        self.cmd_tx.is_some()
    }

    /// Live participant count for the room, floored at 1 (self).
    pub fn peers(&self) -> usize {
        *self.peers_rx.borrow()
    }

    /// Take the channel of remote snapshots. Yields `None` once taken, and
    /// always `None` in single-user mode.
    pub fn remote_edits(&mut self) -> Option<mpsc::Receiver<RemoteEdit>> {
        self.remote_rx.take()
    }

    /// Record a local edit. The latest content wins: each call cancels any
    /// pending send and restarts the debounce window, so at most one
    /// `content:update` goes out per quiet period. Edits arriving inside the
    /// echo guard window after a remote apply are suppressed entirely.
    pub fn edit(&self, content: impl Into<String>) {
        let Some(cmd_tx) = self.cmd_tx.clone() else {
            return;
        };

        if self.echo_guard_active() {
            debug!(room = %self.room, "Suppressing edit inside echo guard window");
            return;
        }

        let content = content.into();
        let debounce = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = cmd_tx.send(Command::Send(content)).await;
        });

        // A canceled timer never fires its send.
        let mut pending = self.pending_send.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    fn echo_guard_active(&self) -> bool {
        let guard = self
            .last_remote_applied
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.is_some_and(|applied| applied.elapsed() < ECHO_GUARD)
    }

    /// End the session: cancel any pending send, tell the relay we are
    /// leaving, and stop the io task.
    pub async fn close(&self) {
        let mut pending = self.pending_send.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        drop(pending);

        if let Some(cmd_tx) = &self.cmd_tx {
            let _ = cmd_tx.send(Command::Close).await;
        }
    }
}

/// Owns the websocket; runs until the relay goes away or the agent closes.
struct IoTask {
    config: SyncConfig,
    room: String,
    peers_tx: watch::Sender<usize>,
    remote_tx: mpsc::Sender<RemoteEdit>,
    last_remote_applied: Arc<Mutex<Option<Instant>>>,
}

impl IoTask {
    async fn run(
        self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        let (mut sink, mut source) = stream.split();

        if let Err(e) = sink.send(self.frame(JoinKind::Join)).await {
            warn!(room = %self.room, "Failed to join room: {}", e);
            return;
        }

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick is immediate and would double up with the join.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Send(content)) => {
                            let msg = ClientMessage::ContentUpdate {
                                user_id: self.config.user_id.clone(),
                                org_id: self.config.org_id.clone(),
                                note_id: self.config.note_id.clone(),
                                content,
                            };
                            if let Err(e) = sink.send(encode(&msg)).await {
                                debug!(room = %self.room, "Send failed, ending session: {}", e);
                                break;
                            }
                        }
                        Some(Command::Close) | None => {
                            let _ = sink.send(self.frame(JoinKind::Leave)).await;
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(self.frame(JoinKind::Heartbeat)).await {
                        debug!(room = %self.room, "Heartbeat failed, ending session: {}", e);
                        break;
                    }
                }

                msg = source.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_server_message(&text),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(room = %self.room, "Relay connection error: {}", e);
                            break;
                        }
                        None => {
                            debug!(room = %self.room, "Relay closed the connection");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_server_message(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<ServerMessage>(text) else {
            debug!(room = %self.room, "Dropping unparseable relay frame");
            return;
        };

        match msg {
            ServerMessage::PresenceUpdate { room, count } => {
                if room == self.room {
                    // Floor at 1: the local participant always counts.
                    let _ = self.peers_tx.send(count.max(1));
                }
            }
            ServerMessage::ContentPatch {
                room,
                user_id,
                content,
            } => {
                if room != self.room || user_id == self.config.user_id {
                    return;
                }
                {
                    let mut guard = self
                        .last_remote_applied
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    *guard = Some(Instant::now());
                }
                let _ = self.remote_tx.try_send(RemoteEdit {
                    from_user_id: user_id,
                    content,
                });
            }
        }
    }

    fn frame(&self, kind: JoinKind) -> Message {
        let user_id = self.config.user_id.clone();
        let org_id = self.config.org_id.clone();
        let note_id = self.config.note_id.clone();
        let msg = match kind {
            JoinKind::Join => ClientMessage::Join {
                user_id,
                org_id,
                note_id,
            },
            JoinKind::Heartbeat => ClientMessage::Heartbeat {
                user_id,
                org_id,
                note_id,
            },
            JoinKind::Leave => ClientMessage::Leave {
                user_id,
                org_id,
                note_id,
            },
        };
        encode(&msg)
    }
}

enum JoinKind {
    Join,
    Heartbeat,
    Leave,
}

fn encode(msg: &ClientMessage) -> Message {
    // ClientMessage contains nothing unserializable
    Message::Text(serde_json::to_string(msg).unwrap_or_default())
}
