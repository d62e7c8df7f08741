pub mod cli;
pub mod events;
pub mod notes;
pub mod presence;
pub mod room;
pub mod store;
pub mod sync;
pub mod ws;

use axum::http::HeaderValue;
use axum::{routing::get, Json, Router};
use presence::PresenceTracker;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use ws::room::RoomManager;

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Configuration for creating a relay router.
#[derive(Default)]
pub struct RouterConfig {
    /// Allowed cross-origin sources. Empty means any origin.
    pub cors_origins: Vec<String>,
}

/// Create the relay router with the given configuration.
///
/// The room registry and presence tracker are constructed here, scoped to
/// the router's lifetime, and handed to every connection handler — no
/// ambient global state.
pub fn create_router_with_config(config: RouterConfig) -> Router {
    create_router_with_state(
        Arc::new(RoomManager::new()),
        Arc::new(PresenceTracker::new()),
        config,
    )
}

/// Create the relay router over caller-owned room and presence state.
/// Embedding applications (and tests) can keep handles to inspect or seed
/// presence outside the wire protocol.
pub fn create_router_with_state(
    room_manager: Arc<RoomManager>,
    presence: Arc<PresenceTracker>,
    config: RouterConfig,
) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health_check))
        .merge(ws::router(room_manager, presence))
        .layer(cors)
}

pub fn create_router() -> Router {
    create_router_with_config(RouterConfig::default())
}
