//! WebSocket module for the broadcast relay.
//!
//! Provides the `/ws` endpoint. Each connection joins at most one room via a
//! `join` message; presence and content fan-out are scoped to that room.

pub mod connection;
pub mod handler;
pub mod protocol;
pub mod room;

use crate::presence::PresenceTracker;
use axum::routing::get;
use axum::Router;
use handler::WsState;
use room::RoomManager;
use std::sync::Arc;

/// Create the WebSocket router.
pub fn router(room_manager: Arc<RoomManager>, presence: Arc<PresenceTracker>) -> Router {
    let state = WsState {
        room_manager,
        presence,
    };

    Router::new()
        .route("/ws", get(handler::ws_handler))
        .with_state(state)
}
