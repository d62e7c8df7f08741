//! Note store and version history engine.
//!
//! Holds the full note collection in memory, optionally mirrored to a JSON
//! file (whole-collection replace on every mutation). Every content-or-title
//! update evaluates the checkpoint policy *before* mutating: the pre-update
//! state is captured as a new version iff there is no version yet, or the
//! newest version is more than five minutes old. History is coarse and
//! time-bucketed, not a per-keystroke undo stack.
//!
//! Known properties, preserved deliberately:
//! - version history grows without bound (no eviction policy);
//! - restore copies a version into the note without first snapshotting the
//!   current state, so divergent live edits are discarded irreversibly.

use crate::events::{NoteChange, NoteChangeBroadcaster, NoteChangeKind};
use crate::notes::{Note, NoteVersion};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Minimum age of the newest version before an update checkpoints again.
pub const CHECKPOINT_INTERVAL_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read note database: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse note database: {0}")]
    ParseError(#[from] serde_json::Error),
}

pub struct NoteStore {
    notes: RwLock<Vec<Note>>,
    /// Backing file; `None` keeps the store purely in memory.
    path: Option<PathBuf>,
    broadcaster: NoteChangeBroadcaster,
}

impl Default for NoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteStore {
    /// Create an in-memory store.
    pub fn new() -> Self {
        Self {
            notes: RwLock::new(Vec::new()),
            path: None,
            broadcaster: NoteChangeBroadcaster::new(64),
        }
    }

    /// Open a store backed by a JSON file, loading any existing collection.
    /// A missing file is an empty store, not an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let notes = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            Vec::new()
        };

        Ok(Self {
            notes: RwLock::new(notes),
            path: Some(path),
            broadcaster: NoteChangeBroadcaster::new(64),
        })
    }

    /// Broadcaster for change notifications. Subscribers learn of mutations
    /// applied here so externally-visible state (other tabs, processes) can
    /// react without polling.
    pub fn broadcaster(&self) -> &NoteChangeBroadcaster {
        &self.broadcaster
    }

    /// Create an empty untitled note, inserted newest-first.
    pub async fn create_note(&self, org_id: Option<String>) -> Note {
        let note = Note::new(org_id, now_ms());
        {
            let mut notes = self.notes.write().await;
            notes.insert(0, note.clone());
            self.persist(&notes);
        }
        self.broadcaster.notify(NoteChange {
            note_id: note.id.clone(),
            kind: NoteChangeKind::Created,
        });
        note
    }

    /// Create a note with initial title and content and no versions. The
    /// first later update will checkpoint this initial state.
    pub async fn create_note_with_content(
        &self,
        org_id: Option<String>,
        title: &str,
        content: &str,
    ) -> Note {
        let mut note = Note::new(org_id, now_ms());
        note.title = title.to_string();
        note.content = content.to_string();
        {
            let mut notes = self.notes.write().await;
            notes.insert(0, note.clone());
            self.persist(&notes);
        }
        self.broadcaster.notify(NoteChange {
            note_id: note.id.clone(),
            kind: NoteChangeKind::Created,
        });
        note
    }

    /// Apply new content (and optionally a new title) to a note.
    ///
    /// The checkpoint policy runs first: if the note has no version yet, or
    /// its newest version is older than [`CHECKPOINT_INTERVAL_MS`], the
    /// *pre-update* content, title, and `updatedAt` are pushed as a new front
    /// version. Returns `false` without touching anything when the note does
    /// not exist.
    pub async fn update_note(&self, id: &str, content: &str, title: Option<&str>) -> bool {
        self.update_note_at(id, content, title, now_ms()).await
    }

    /// [`Self::update_note`] with an explicit clock, for deterministic tests.
    pub async fn update_note_at(
        &self,
        id: &str,
        content: &str,
        title: Option<&str>,
        now_ms: u64,
    ) -> bool {
        let updated = {
            let mut notes = self.notes.write().await;
            let Some(note) = notes.iter_mut().find(|n| n.id == id) else {
                return false;
            };

            let should_checkpoint = match note.versions.first() {
                None => true,
                Some(last) => now_ms.saturating_sub(last.timestamp) > CHECKPOINT_INTERVAL_MS,
            };
            if should_checkpoint {
                let version = NoteVersion {
                    id: uuid::Uuid::new_v4().to_string(),
                    content: note.content.clone(),
                    title: note.title.clone(),
                    timestamp: note.updated_at,
                    org_id: note.org_id.clone(),
                };
                note.versions.insert(0, version);
            }

            note.content = content.to_string();
            if let Some(title) = title {
                note.title = title.to_string();
            }
            note.updated_at = now_ms;

            self.persist(&notes);
            true
        };

        if updated {
            self.broadcaster.notify(NoteChange {
                note_id: id.to_string(),
                kind: NoteChangeKind::Updated,
            });
        }
        updated
    }

    /// Append a version snapshot unconditionally, bypassing the time bucket.
    /// Used for explicit "save a version now" actions.
    pub async fn add_version(&self, note_id: &str, content: &str, title: &str) -> bool {
        let added = {
            let mut notes = self.notes.write().await;
            let Some(note) = notes.iter_mut().find(|n| n.id == note_id) else {
                return false;
            };

            let version = NoteVersion {
                id: uuid::Uuid::new_v4().to_string(),
                content: content.to_string(),
                title: title.to_string(),
                timestamp: now_ms(),
                org_id: note.org_id.clone(),
            };
            note.versions.insert(0, version);
            self.persist(&notes);
            true
        };

        if added {
            self.broadcaster.notify(NoteChange {
                note_id: note_id.to_string(),
                kind: NoteChangeKind::Updated,
            });
        }
        added
    }

    /// Copy a version's content and title back into the note and bump
    /// `updatedAt`. The version list is left untouched: the pre-restore state
    /// is *not* captured, so live edits are discarded. Unknown note or
    /// version ids are a silent no-op returning `false`; callers that need to
    /// distinguish must check existence first.
    pub async fn restore_version(&self, note_id: &str, version_id: &str) -> bool {
        let restored = {
            let mut notes = self.notes.write().await;
            let Some(note) = notes.iter_mut().find(|n| n.id == note_id) else {
                return false;
            };
            let Some(version) = note.versions.iter().find(|v| v.id == version_id) else {
                return false;
            };

            note.content = version.content.clone();
            note.title = version.title.clone();
            note.updated_at = now_ms();
            self.persist(&notes);
            true
        };

        if restored {
            self.broadcaster.notify(NoteChange {
                note_id: note_id.to_string(),
                kind: NoteChangeKind::Restored,
            });
        }
        restored
    }

    /// Version history for a note, stored order (newest first), unfiltered.
    /// Unknown notes yield an empty list.
    pub async fn versions(&self, note_id: &str) -> Vec<NoteVersion> {
        let notes = self.notes.read().await;
        notes
            .iter()
            .find(|n| n.id == note_id)
            .map(|n| n.versions.clone())
            .unwrap_or_default()
    }

    pub async fn get_note(&self, id: &str) -> Option<Note> {
        let notes = self.notes.read().await;
        notes.iter().find(|n| n.id == id).cloned()
    }

    pub async fn list_notes(&self) -> Vec<Note> {
        self.notes.read().await.clone()
    }

    pub async fn notes_for_org(&self, org_id: &str) -> Vec<Note> {
        let notes = self.notes.read().await;
        notes
            .iter()
            .filter(|n| n.org_id.as_deref() == Some(org_id))
            .cloned()
            .collect()
    }

    pub async fn delete_note(&self, id: &str) -> bool {
        let deleted = {
            let mut notes = self.notes.write().await;
            let before = notes.len();
            notes.retain(|n| n.id != id);
            if notes.len() == before {
                return false;
            }
            self.persist(&notes);
            true
        };

        if deleted {
            self.broadcaster.notify(NoteChange {
                note_id: id.to_string(),
                kind: NoteChangeKind::Deleted,
            });
        }
        deleted
    }

    pub async fn toggle_pin(&self, id: &str) -> bool {
        let toggled = {
            let mut notes = self.notes.write().await;
            let Some(note) = notes.iter_mut().find(|n| n.id == id) else {
                return false;
            };
            note.pinned = !note.pinned;
            self.persist(&notes);
            true
        };

        if toggled {
            self.broadcaster.notify(NoteChange {
                note_id: id.to_string(),
                kind: NoteChangeKind::Updated,
            });
        }
        toggled
    }

    /// Whole-collection replace of the backing file. Write failures are
    /// logged, not propagated: the in-memory state is already authoritative
    /// and the next mutation retries.
    fn persist(&self, notes: &[Note]) {
        let Some(path) = &self.path else { return };
        let data = match serde_json::to_vec_pretty(notes) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to serialize note database: {}", e);
                return;
            }
        };

        // Write to a sibling file and rename so a crash mid-write cannot
        // truncate the collection.
        let tmp = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, data).and_then(|()| std::fs::rename(&tmp, path)) {
            tracing::warn!("Failed to write note database: {}", e);
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_update_checkpoints_pre_update_state() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;

        assert!(
            store
                .update_note_at(&note.id, "<p>Hello</p>", Some("Greeting"), note.updated_at + 10)
                .await
        );

        let updated = store.get_note(&note.id).await.unwrap();
        assert_eq!(updated.content, "<p>Hello</p>");
        assert_eq!(updated.title, "Greeting");
        assert_eq!(updated.versions.len(), 1);
        // The version holds the state before the edit.
        assert_eq!(updated.versions[0].content, "");
        assert_eq!(updated.versions[0].title, "Untitled Note");
        assert_eq!(updated.versions[0].timestamp, note.updated_at);
    }

    #[tokio::test]
    async fn updates_within_five_minutes_share_one_checkpoint() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;
        let t0 = note.updated_at;

        store.update_note_at(&note.id, "a", None, t0 + 1_000).await;
        store.update_note_at(&note.id, "b", None, t0 + 60_000).await;
        store.update_note_at(&note.id, "c", None, t0 + 240_000).await;

        let updated = store.get_note(&note.id).await.unwrap();
        assert_eq!(updated.content, "c");
        assert_eq!(updated.versions.len(), 1);
    }

    #[tokio::test]
    async fn update_past_the_bucket_checkpoints_again() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;
        let t0 = note.updated_at;

        store.update_note_at(&note.id, "a", None, t0 + 1_000).await;
        store
            .update_note_at(&note.id, "b", None, t0 + 1_000 + CHECKPOINT_INTERVAL_MS + 1)
            .await;

        let updated = store.get_note(&note.id).await.unwrap();
        assert_eq!(updated.versions.len(), 2);
        // Newest-first: the front version captured "a".
        assert_eq!(updated.versions[0].content, "a");
        assert_eq!(updated.versions[1].content, "");
    }

    #[tokio::test]
    async fn update_exactly_at_the_bucket_boundary_does_not_checkpoint() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;
        let t0 = note.updated_at;

        store.update_note_at(&note.id, "a", None, t0 + 1_000).await;
        // The policy is strictly-greater-than five minutes.
        store
            .update_note_at(&note.id, "b", None, t0 + 1_000 + CHECKPOINT_INTERVAL_MS)
            .await;

        let updated = store.get_note(&note.id).await.unwrap();
        assert_eq!(updated.versions.len(), 1);
    }

    #[tokio::test]
    async fn restore_copies_state_without_new_version() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;
        store
            .update_note_at(&note.id, "old body", Some("Old"), note.updated_at + 10)
            .await;
        store
            .update_note_at(
                &note.id,
                "new body",
                Some("New"),
                note.updated_at + CHECKPOINT_INTERVAL_MS + 20,
            )
            .await;

        let versions = store.versions(&note.id).await;
        assert_eq!(versions.len(), 2);
        let target = &versions[0]; // captured "old body"
        assert_eq!(target.content, "old body");

        assert!(store.restore_version(&note.id, &target.id).await);

        let restored = store.get_note(&note.id).await.unwrap();
        assert_eq!(restored.content, "old body");
        assert_eq!(restored.title, "Old");
        // Restore itself never checkpoints.
        assert_eq!(restored.versions.len(), 2);
    }

    #[tokio::test]
    async fn restore_with_unknown_ids_is_a_noop() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;
        store
            .update_note_at(&note.id, "body", None, note.updated_at + 10)
            .await;
        let before = store.get_note(&note.id).await.unwrap();

        assert!(!store.restore_version(&note.id, "no-such-version").await);
        assert!(!store.restore_version("no-such-note", "whatever").await);

        assert_eq!(store.get_note(&note.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn versions_of_unknown_note_is_empty() {
        let store = NoteStore::new();
        assert!(store.versions("missing").await.is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_note_is_rejected() {
        let store = NoteStore::new();
        assert!(!store.update_note("missing", "x", None).await);
    }

    #[tokio::test]
    async fn add_version_bypasses_the_bucket() {
        let store = NoteStore::new();
        let note = store.create_note(None).await;

        assert!(store.add_version(&note.id, "a", "T").await);
        assert!(store.add_version(&note.id, "b", "T").await);
        assert_eq!(store.versions(&note.id).await.len(), 2);
    }

    #[tokio::test]
    async fn notes_are_scoped_by_org() {
        let store = NoteStore::new();
        store.create_note(Some("acme".into())).await;
        store.create_note(Some("globex".into())).await;
        store.create_note(None).await;

        assert_eq!(store.notes_for_org("acme").await.len(), 1);
        assert_eq!(store.notes_for_org("initech").await.len(), 0);
    }
}
