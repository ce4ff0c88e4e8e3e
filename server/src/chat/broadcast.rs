//! WebSocket broadcast helpers for chat events.
//! Wraps presence changes in server frames and broadcasts them to all connected WS clients.

use crate::chat::registry::ClientRecord;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::ServerFrame;
use crate::ws::ConnectionRegistry;

/// Broadcast an `info` notice to all connected WS clients.
pub fn broadcast_info(registry: &ConnectionRegistry, message: impl Into<String>) {
    broadcast_to_all(registry, &ServerFrame::info(message));
}

/// Broadcast a `receiver.updated` event to all connected WS clients.
pub fn broadcast_receiver_updated(registry: &ConnectionRegistry, record: &ClientRecord) {
    let frame = ServerFrame::ReceiverUpdated {
        receiver: record.clone(),
    };
    broadcast_to_all(registry, &frame);
}
