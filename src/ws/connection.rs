//! Per-connection state for WebSocket connections.

use tokio::sync::mpsc;

/// Unique connection ID.
pub type ConnectionId = String;

/// Outgoing message to send to a WebSocket client.
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    /// JSON protocol frame.
    Text(String),
    /// Close the connection.
    Close,
}

/// Handle to a connected client, held by the room it has joined.
#[derive(Debug)]
pub struct WsConnection {
    /// Unique connection ID (server-generated UUID)
    pub id: ConnectionId,

    /// Sender for outgoing messages to this connection
    pub sender: mpsc::Sender<OutgoingMessage>,
}

impl WsConnection {
    pub fn new(sender: mpsc::Sender<OutgoingMessage>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
        }
    }

    /// Send a message to this connection (non-blocking).
    /// Returns false if the channel is full or closed; a slow or dead peer
    /// loses frames rather than stalling the room.
    pub fn try_send(&self, msg: OutgoingMessage) -> bool {
        self.sender.try_send(msg).is_ok()
    }

    /// Send a text frame.
    pub fn try_send_text(&self, text: String) -> bool {
        self.try_send(OutgoingMessage::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_send_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = WsConnection::new(tx);

        assert!(conn.try_send_text("a".into()));
        assert!(!conn.try_send_text("b".into()));

        match rx.recv().await {
            Some(OutgoingMessage::Text(t)) => assert_eq!(t, "a"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
