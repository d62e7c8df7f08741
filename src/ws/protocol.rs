//! Wire protocol for the relay.
//!
//! Messages are JSON text frames, tagged by a `type` field. Anything that
//! fails to parse, and any recognized-shape message with an unknown tag, is
//! dropped by the relay without closing the connection.

use serde::{Deserialize, Serialize};

/// Messages a client sends to the relay. The sync agent serializes these;
/// the relay deserializes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Bind the connection to the room for `(orgId, noteId)` and announce
    /// presence.
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        user_id: String,
        org_id: String,
        note_id: String,
    },

    /// Refresh presence while idle. Clients send these well under the
    /// 20-second staleness window.
    #[serde(rename = "presence:heartbeat", rename_all = "camelCase")]
    Heartbeat {
        user_id: String,
        org_id: String,
        note_id: String,
    },

    /// Full-document snapshot to fan out to the rest of the room. Not a
    /// diff: the last snapshot a peer receives wins on that peer's side.
    #[serde(rename = "content:update", rename_all = "camelCase")]
    ContentUpdate {
        user_id: String,
        org_id: String,
        note_id: String,
        content: String,
    },

    /// Explicit departure.
    #[serde(rename = "leave", rename_all = "camelCase")]
    Leave {
        user_id: String,
        org_id: String,
        note_id: String,
    },

    /// Recognized-but-unhandled tags land here and are ignored.
    #[serde(other)]
    Unknown,
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Updated participant count for a room, sent to every member on any
    /// membership change.
    #[serde(rename = "presence:update")]
    PresenceUpdate { room: String, count: usize },

    /// A peer's document snapshot, sent to every room member except the
    /// author.
    #[serde(rename = "content:patch", rename_all = "camelCase")]
    ContentPatch {
        room: String,
        user_id: String,
        content: String,
    },
}

/// Parse a client frame. `None` means malformed: the caller drops it.
pub fn decode_client_message(text: &str) -> Option<ClientMessage> {
    serde_json::from_str(text).ok()
}

/// Serialize a server frame.
pub fn encode_server_message(msg: &ServerMessage) -> String {
    // ServerMessage contains nothing unserializable
    serde_json::to_string(msg).unwrap_or_default()
}
