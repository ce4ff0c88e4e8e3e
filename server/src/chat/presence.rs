//! Presence announcements and the read-only presence endpoint.
//!
//! Join/leave notices go to every open connection, registered or not.
//! The registry itself never broadcasts; the router calls in here after
//! each registry mutation.

use axum::{extract::State, Json};

use crate::chat::broadcast::{broadcast_info, broadcast_receiver_updated};
use crate::chat::registry::ClientRecord;
use crate::state::AppState;
use crate::ws::ConnectionRegistry;

pub fn joined_notice(name: &str) -> String {
    format!("{} joined", name)
}

pub fn left_notice(name: &str) -> String {
    format!("{} left", name)
}

// --- Functions called from the router ---

/// Broadcast a join: `info` first, then `receiver.updated` with the online record.
pub fn announce_join(connections: &ConnectionRegistry, record: &ClientRecord) {
    broadcast_info(connections, joined_notice(&record.name));
    broadcast_receiver_updated(connections, record);
}

/// Broadcast a leave: `receiver.updated` with the offline record, then `info`.
pub fn announce_leave(connections: &ConnectionRegistry, record: &ClientRecord) {
    broadcast_receiver_updated(connections, record);
    broadcast_info(connections, left_notice(&record.name));
}

// --- REST endpoint handlers ---

/// GET /api/clients: every known name with its online flag, sorted by name.
pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientRecord>> {
    Json(state.clients.snapshot().into_values().collect())
}
