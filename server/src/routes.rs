use axum::{routing::get, Router};

use crate::chat::presence;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the axum Router: WebSocket endpoint, presence listing and health check.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (no auth; clients register by name over the socket)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let api_routes = Router::new().route("/api/clients", get(presence::list_clients));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
