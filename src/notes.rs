//! Note and version models.
//!
//! Field names are camelCase on the wire to match the persisted schema the
//! editor UI already reads.

use serde::{Deserialize, Serialize};

/// An immutable snapshot of a note's state *before* the edit that triggered
/// the checkpoint. Once created it is only ever read, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NoteVersion {
    pub id: String,
    pub content: String,
    pub title: String,
    /// Epoch millis of the state being captured (the note's `updatedAt` at
    /// checkpoint time).
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

/// A note with its version history, newest version first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    /// HTML document body. Treated as an opaque snapshot by the sync core.
    pub content: String,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default)]
    pub versions: Vec<NoteVersion>,
}

impl Note {
    /// Create an empty untitled note.
    pub fn new(org_id: Option<String>, now_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: "Untitled Note".to_string(),
            content: String::new(),
            created_at: now_ms,
            updated_at: now_ms,
            pinned: false,
            org_id,
            versions: Vec::new(),
        }
    }
}
