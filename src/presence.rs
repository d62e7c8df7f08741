//! Per-room presence tracking.
//!
//! Maps `room key -> participant id -> last seen (epoch millis)`. Entries are
//! refreshed on join, heartbeat, and content messages, removed on explicit
//! leave or disconnect, and otherwise pruned lazily: staleness is only
//! evaluated when some room event arrives, never by a background timer. An
//! idle room can therefore report a stale count until its next event, which
//! is acceptable for a presence indicator.
//!
//! The tracker reports raw counts, including zero. The "at least 1 (self)"
//! floor belongs to consumers, not here. A room whose last entry is pruned
//! or removed is dropped entirely, so the registry does not accumulate keys
//! for every room ever touched.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Age beyond which a presence entry is considered stale and pruned.
pub const STALE_AFTER_MS: u64 = 20_000;

/// Outcome of a [`PresenceTracker::prune`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Entries remaining in the room after pruning. May be zero.
    pub count: usize,
    /// Entries removed by this pass.
    pub removed: usize,
}

/// Tracks which participants are live in which rooms.
///
/// Constructed once at service start and shared by handle with every
/// connection handler.
pub struct PresenceTracker {
    rooms: RwLock<HashMap<String, HashMap<String, u64>>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or refresh a participant's entry with the current time.
    /// Returns `true` if the participant was not previously present.
    pub async fn touch(&self, room: &str, participant: &str) -> bool {
        self.touch_at(room, participant, now_ms()).await
    }

    /// [`Self::touch`] with an explicit clock, for deterministic tests.
    pub async fn touch_at(&self, room: &str, participant: &str, now_ms: u64) -> bool {
        let mut rooms = self.rooms.write().await;
        let entries = rooms.entry(room.to_string()).or_default();
        entries.insert(participant.to_string(), now_ms).is_none()
    }

    /// Drop every entry older than [`STALE_AFTER_MS`] and report the result.
    /// Pruning an unknown room yields an empty outcome, not an error.
    pub async fn prune(&self, room: &str) -> PruneOutcome {
        self.prune_at(room, now_ms()).await
    }

    /// [`Self::prune`] with an explicit clock, for deterministic tests.
    pub async fn prune_at(&self, room: &str, now_ms: u64) -> PruneOutcome {
        let mut rooms = self.rooms.write().await;
        let Some(entries) = rooms.get_mut(room) else {
            return PruneOutcome {
                count: 0,
                removed: 0,
            };
        };

        let before = entries.len();
        entries.retain(|_, last_seen| now_ms.saturating_sub(*last_seen) <= STALE_AFTER_MS);

        let outcome = PruneOutcome {
            count: entries.len(),
            removed: before - entries.len(),
        };

        // An emptied room would otherwise keep its key forever.
        if entries.is_empty() {
            rooms.remove(room);
        }

        outcome
    }

    /// Remove a participant's entry. Returns `true` if it existed.
    pub async fn remove(&self, room: &str, participant: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(entries) = rooms.get_mut(room) else {
            return false;
        };

        let removed = entries.remove(participant).is_some();
        if entries.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Current raw entry count for a room (no staleness evaluation).
    pub async fn count(&self, room: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(HashMap::len).unwrap_or(0)
    }

    /// Number of rooms currently holding at least one entry.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
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
    async fn touch_then_prune_keeps_fresh_entry() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 1_000).await;

        let outcome = tracker.prune_at("r", 1_000).await;
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.removed, 0);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_entries() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 0).await;
        tracker.touch_at("r", "bob", 15_000).await;

        // alice is 21s old, bob 6s.
        let outcome = tracker.prune_at("r", 21_000).await;
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.removed, 1);
        assert_eq!(tracker.count("r").await, 1);
    }

    #[tokio::test]
    async fn entry_exactly_at_threshold_survives() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 0).await;

        let outcome = tracker.prune_at("r", STALE_AFTER_MS).await;
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn prune_reports_raw_zero_count() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 0).await;

        let outcome = tracker.prune_at("r", 30_000).await;
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.removed, 1);
    }

    #[tokio::test]
    async fn touch_refreshes_instead_of_duplicating() {
        let tracker = PresenceTracker::new();
        assert!(tracker.touch_at("r", "alice", 0).await);
        assert!(!tracker.touch_at("r", "alice", 19_000).await);

        // The refreshed timestamp keeps alice alive past her original window.
        let outcome = tracker.prune_at("r", 25_000).await;
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn remove_deletes_exactly_one_participant() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 1_000).await;
        tracker.touch_at("r", "bob", 1_000).await;

        assert!(tracker.remove("r", "alice").await);
        assert!(!tracker.remove("r", "alice").await);
        assert_eq!(tracker.count("r").await, 1);
    }

    #[tokio::test]
    async fn unknown_room_operations_are_noops() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.remove("nope", "alice").await);
        let outcome = tracker.prune_at("nope", 0).await;
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.removed, 0);
    }

    #[tokio::test]
    async fn fully_pruned_room_leaves_no_residue() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 0).await;
        tracker.touch_at("r", "bob", 0).await;
        assert_eq!(tracker.room_count().await, 1);

        let outcome = tracker.prune_at("r", 30_000).await;
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.removed, 2);
        assert_eq!(tracker.room_count().await, 0);

        // A second prune sees no room at all, not an empty shell.
        let outcome = tracker.prune_at("r", 30_000).await;
        assert_eq!(outcome.removed, 0);
    }

    #[tokio::test]
    async fn removing_the_last_participant_drops_the_room() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r", "alice", 0).await;

        assert!(tracker.remove("r", "alice").await);
        assert_eq!(tracker.room_count().await, 0);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let tracker = PresenceTracker::new();
        tracker.touch_at("r1", "alice", 0).await;
        tracker.touch_at("r2", "alice", 0).await;

        tracker.remove("r1", "alice").await;
        assert_eq!(tracker.count("r2").await, 1);
    }
}
