//! Rooms: the routing scope for presence and content broadcast.
//!
//! A room exists only implicitly, as the set of connections currently bound
//! to one `(org, note)` key; it holds no state beyond that set. The relay
//! performs no organization-level authorization — `orgId` participates in
//! routing only, and enforcing tenant access is the caller's trust boundary.

use super::connection::{ConnectionId, WsConnection};
use super::protocol::{encode_server_message, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A room manages all WebSocket connections bound to a single room key.
pub struct Room {
    key: String,
    connections: RwLock<HashMap<ConnectionId, Arc<WsConnection>>>,
}

impl Room {
    pub fn new(key: String) -> Self {
        Self {
            key,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Add a connection to this room.
    pub async fn add_connection(&self, conn: Arc<WsConnection>) {
        self.connections
            .write()
            .await
            .insert(conn.id.clone(), conn);
    }

    /// Remove a connection from this room.
    pub async fn remove_connection(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Get the number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Broadcast a message to all connections.
    pub async fn broadcast_all(&self, msg: &ServerMessage) {
        let encoded = encode_server_message(msg);
        let connections = self.connections.read().await;
        for conn in connections.values() {
            let _ = conn.try_send_text(encoded.clone());
        }
    }

    /// Broadcast a message to all connections except one.
    pub async fn broadcast_except(&self, except_conn_id: &str, msg: &ServerMessage) {
        let encoded = encode_server_message(msg);
        let connections = self.connections.read().await;
        for (conn_id, conn) in connections.iter() {
            if conn_id != except_conn_id {
                // Non-blocking send, drop if buffer full
                let _ = conn.try_send_text(encoded.clone());
            }
        }
    }
}

/// Manager for all live rooms.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the room for a key.
    pub async fn get_or_create_room(&self, key: &str) -> Arc<Room> {
        // Check with read lock first
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(key) {
                return room.clone();
            }
        }

        // Create with write lock
        let mut rooms = self.rooms.write().await;

        // Double-check
        if let Some(room) = rooms.get(key) {
            return room.clone();
        }

        let room = Arc::new(Room::new(key.to_string()));
        rooms.insert(key.to_string(), room.clone());
        room
    }

    /// Look up a room without creating it.
    pub async fn get_room(&self, key: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(key).cloned()
    }

    /// Remove rooms whose last connection has left.
    pub async fn cleanup_empty_rooms(&self) {
        let mut rooms = self.rooms.write().await;
        let mut to_remove = Vec::new();

        for (key, room) in rooms.iter() {
            if room.connection_count().await == 0 {
                to_remove.push(key.clone());
            }
        }

        for key in to_remove {
            rooms.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::OutgoingMessage;
    use tokio::sync::mpsc;

    fn test_conn() -> (Arc<WsConnection>, mpsc::Receiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(WsConnection::new(tx)), rx)
    }

    async fn recv_text(rx: &mut mpsc::Receiver<OutgoingMessage>) -> Option<String> {
        match rx.try_recv() {
            Ok(OutgoingMessage::Text(t)) => Some(t),
            _ => None,
        }
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_sender() {
        let room = Room::new("org-a:note-1".into());
        let (c1, mut rx1) = test_conn();
        let (c2, mut rx2) = test_conn();
        let sender_id = c1.id.clone();
        room.add_connection(c1).await;
        room.add_connection(c2).await;

        room.broadcast_except(
            &sender_id,
            &ServerMessage::ContentPatch {
                room: "org-a:note-1".into(),
                user_id: "u1".into(),
                content: "X".into(),
            },
        )
        .await;

        assert!(recv_text(&mut rx1).await.is_none());
        let got = recv_text(&mut rx2).await.expect("peer should receive");
        assert!(got.contains(r#""content":"X""#));
    }

    #[tokio::test]
    async fn broadcast_all_reaches_everyone() {
        let room = Room::new("r".into());
        let (c1, mut rx1) = test_conn();
        let (c2, mut rx2) = test_conn();
        room.add_connection(c1).await;
        room.add_connection(c2).await;

        room.broadcast_all(&ServerMessage::PresenceUpdate {
            room: "r".into(),
            count: 2,
        })
        .await;

        assert!(recv_text(&mut rx1).await.is_some());
        assert!(recv_text(&mut rx2).await.is_some());
    }

    #[tokio::test]
    async fn manager_reuses_and_garbage_collects_rooms() {
        let manager = RoomManager::new();
        let room = manager.get_or_create_room("r").await;
        assert!(Arc::ptr_eq(&room, &manager.get_or_create_room("r").await));

        let (conn, _rx) = test_conn();
        let conn_id = conn.id.clone();
        room.add_connection(conn).await;
        manager.cleanup_empty_rooms().await;
        assert!(manager.get_room("r").await.is_some());

        room.remove_connection(&conn_id).await;
        manager.cleanup_empty_rooms().await;
        assert!(manager.get_room("r").await.is_none());
    }
}
