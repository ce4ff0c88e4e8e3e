use std::sync::Arc;

use crate::chat::registry::ClientRegistry;
use crate::config::{Config, Heartbeat};
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Every open WebSocket, registered or not
    pub connections: ConnectionRegistry,
    /// Display name -> owning connection and presence
    pub clients: Arc<ClientRegistry>,
    /// Server ping settings; `None` disables idle detection
    pub heartbeat: Option<Heartbeat>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            connections: new_connection_registry(),
            clients: Arc::new(ClientRegistry::new(config.name_policy)),
            heartbeat: config.heartbeat(),
        }
    }
}
