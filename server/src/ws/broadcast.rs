use super::{ConnectionId, ConnectionRegistry};
use crate::ws::protocol::ServerFrame;

/// Broadcast a frame to every open connection, registered or not.
/// The frame is serialized once; a connection that closed after enumeration is skipped.
pub fn broadcast_to_all(registry: &ConnectionRegistry, frame: &ServerFrame) {
    let Some(msg) = frame.to_message() else {
        return;
    };

    for entry in registry.iter() {
        let _ = entry.value().send(msg.clone());
    }
}

/// Send a frame to a single connection. Returns false if it is no longer open.
pub fn send_to_connection(
    registry: &ConnectionRegistry,
    connection_id: ConnectionId,
    frame: &ServerFrame,
) -> bool {
    let Some(sender) = registry.get(&connection_id).map(|entry| entry.value().clone()) else {
        return false;
    };
    match frame.to_message() {
        Some(msg) => sender.send(msg).is_ok(),
        None => false,
    }
}
