use std::sync::Arc;
use tokio::sync::broadcast;

/// What happened to a note. Emitted after the mutation has been applied and
/// persisted, so observers (other tabs, processes) can reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteChangeKind {
    Created,
    Updated,
    Deleted,
    Restored,
}

#[derive(Debug, Clone)]
pub struct NoteChange {
    pub note_id: String,
    pub kind: NoteChangeKind,
}

#[derive(Clone)]
pub struct NoteChangeBroadcaster {
    sender: Arc<broadcast::Sender<NoteChange>>,
}

impl NoteChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoteChange> {
        self.sender.subscribe()
    }

    pub fn notify(&self, change: NoteChange) {
        // Ignore errors when there are no active subscribers
        let _ = self.sender.send(change);
    }
}
