//! Client-side synchronization.

pub mod agent;

pub use agent::{RemoteEdit, SyncAgent, SyncConfig};
