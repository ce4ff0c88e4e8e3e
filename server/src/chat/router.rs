//! Per-connection frame dispatch.
//!
//! Each connection moves Unregistered -> Registered -> Closed. The actor owns
//! the [`ConnectionState`] and feeds frames in arrival order; everything here
//! is synchronous and never waits on another connection's socket.

use crate::chat::presence;
use crate::chat::registry::{ClientRecord, RegisterError};
use crate::state::AppState;
use crate::ws::broadcast::send_to_connection;
use crate::ws::protocol::{
    decode_binary_frame, decode_client_frame, send_frame, ChatMessage, ClientFrame, FrameError,
    ServerFrame, WELCOME_MESSAGE,
};
use crate::ws::{ConnectionId, ConnectionSender};

/// Router-side state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unregistered,
    Registered { name: String },
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Registered { name } => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Everything the router needs to act on behalf of one connection.
///
/// Dropping a session closes it, so the offline transition runs exactly once
/// however the connection ends.
pub struct Session<'a> {
    pub state: &'a AppState,
    pub connection_id: ConnectionId,
    pub tx: &'a ConnectionSender,
    pub status: ConnectionState,
}

impl<'a> Session<'a> {
    pub fn new(state: &'a AppState, connection_id: ConnectionId, tx: &'a ConnectionSender) -> Self {
        Self {
            state,
            connection_id,
            tx,
            status: ConnectionState::Unregistered,
        }
    }

    /// Greet a freshly opened connection.
    pub fn open(&self) {
        send_frame(self.tx, &ServerFrame::info(WELCOME_MESSAGE));
    }

    /// Handle one inbound text frame. Malformed frames are logged and dropped.
    pub fn handle_text(&mut self, text: &str) {
        let decoded = decode_client_frame(text);
        self.handle_decoded(decoded);
    }

    /// Handle one inbound binary frame carrying JSON text.
    pub fn handle_binary(&mut self, data: &[u8]) {
        let decoded = decode_binary_frame(data);
        self.handle_decoded(decoded);
    }

    fn handle_decoded(&mut self, decoded: Result<ClientFrame, FrameError>) {
        match decoded {
            Ok(frame) => self.dispatch(frame),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Dropping malformed frame"
                );
            }
        }
    }

    /// Dispatch a decoded frame based on its type and the connection state.
    pub fn dispatch(&mut self, frame: ClientFrame) {
        if self.status == ConnectionState::Closed {
            return;
        }

        match frame {
            ClientFrame::Init { sender } => self.handle_init(sender),
            ClientFrame::Message(message) => self.handle_message(message),
            ClientFrame::Unknown { kind } => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    kind = %kind,
                    "Ignoring unknown frame type"
                );
            }
        }
    }

    /// The name this connection still owns.
    ///
    /// A name taken over by a newer connection drops this one back to
    /// Unregistered, so it can no longer speak as that name but may `init` again.
    fn owned_name(&mut self) -> Option<String> {
        let ConnectionState::Registered { name } = &self.status else {
            return None;
        };
        match self.state.clients.name_of(self.connection_id) {
            Some(owned) if owned == *name => Some(owned),
            _ => {
                tracing::info!(
                    connection_id = %self.connection_id,
                    name = %name,
                    "Name was taken over, connection is unregistered again"
                );
                self.status = ConnectionState::Unregistered;
                None
            }
        }
    }

    fn handle_init(&mut self, sender: String) {
        if let Some(name) = self.owned_name() {
            tracing::debug!(
                connection_id = %self.connection_id,
                name = %name,
                requested = %sender,
                "Ignoring init from registered connection"
            );
            return;
        }

        let registration = match self.state.clients.register(&sender, self.connection_id) {
            Ok(registration) => registration,
            Err(RegisterError::NameTaken(name)) => {
                tracing::info!(
                    connection_id = %self.connection_id,
                    name = %name,
                    "Rejected init for a name that is already online"
                );
                send_frame(
                    self.tx,
                    &ServerFrame::info(RegisterError::NameTaken(name).to_string()),
                );
                return;
            }
        };

        if let Some(previous) = registration.superseded {
            tracing::info!(
                connection_id = %self.connection_id,
                previous_connection = %previous,
                name = %sender,
                "Name taken over by a new connection"
            );
        }

        presence::announce_join(&self.state.connections, &registration.record);
        send_frame(
            self.tx,
            &ServerFrame::InitSuccess {
                receivers: registration.snapshot,
            },
        );

        tracing::info!(
            connection_id = %self.connection_id,
            name = %sender,
            online = self.state.clients.online_count(),
            "Client registered"
        );
        self.status = ConnectionState::Registered { name: sender };
    }

    fn handle_message(&mut self, message: ChatMessage) {
        let Some(name) = self.owned_name() else {
            tracing::debug!(
                connection_id = %self.connection_id,
                receiver = %message.receiver,
                "Dropping message from unregistered connection"
            );
            return;
        };

        if message.sender != name {
            tracing::debug!(
                connection_id = %self.connection_id,
                name = %name,
                sender = %message.sender,
                "Message sender differs from registered name"
            );
        }

        let ChatMessage {
            sender,
            receiver,
            message,
        } = message;

        // Best effort: an offline or unknown receiver is not reported back.
        let delivered = match self.state.clients.route_target(&receiver) {
            Some(target) => send_to_connection(
                &self.state.connections,
                target,
                &ServerFrame::Message {
                    sender: sender.clone(),
                    message: message.clone(),
                },
            ),
            None => false,
        };

        tracing::debug!(
            connection_id = %self.connection_id,
            sender = %sender,
            receiver = %receiver,
            delivered = delivered,
            "Relayed message"
        );

        send_frame(
            self.tx,
            &ServerFrame::MessageSuccess {
                sender,
                receiver,
                message,
            },
        );
    }

    /// Mark the connection closed. Only the first call has any effect.
    pub fn close(&mut self) -> Option<ClientRecord> {
        if self.status == ConnectionState::Closed {
            return None;
        }
        self.status = ConnectionState::Closed;
        handle_close(self.state, self.connection_id)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Release a closed connection: drop it from the open table, flip its name
/// offline and announce the leave. Returns the offline record, if any.
pub fn handle_close(state: &AppState, connection_id: ConnectionId) -> Option<ClientRecord> {
    state.connections.remove(&connection_id);

    let record = state.clients.mark_offline(connection_id)?;
    presence::announce_leave(&state.connections, &record);

    tracing::info!(
        connection_id = %connection_id,
        name = %record.name,
        online = state.clients.online_count(),
        "Client went offline"
    );
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NamePolicy};
    use axum::extract::ws::Message;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        tx: ConnectionSender,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    fn open_peer(state: &AppState) -> Peer {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        state.connections.insert(id, tx.clone());
        Peer { id, tx, rx }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    fn state_with(policy: NamePolicy) -> AppState {
        AppState::new(&Config {
            name_policy: policy,
            ..Config::default()
        })
    }

    const INIT_ALICE: &str = r#"{"type":"init","sender":"alice"}"#;
    const INIT_BOB: &str = r#"{"type":"init","sender":"bob"}"#;

    #[test]
    fn open_sends_welcome() {
        let state = state_with(NamePolicy::Overwrite);
        let mut peer = open_peer(&state);
        Session::new(&state, peer.id, &peer.tx).open();
        assert_eq!(
            drain(&mut peer.rx),
            vec![json!({"type": "info", "message": WELCOME_MESSAGE})]
        );
    }

    #[test]
    fn init_broadcasts_then_acknowledges() {
        let state = state_with(NamePolicy::Overwrite);
        let mut watcher = open_peer(&state);
        let mut alice = open_peer(&state);

        let mut session = Session::new(&state, alice.id, &alice.tx);
        session.handle_text(INIT_ALICE);
        assert_eq!(session.status.name(), Some("alice"));

        let broadcast = vec![
            json!({"type": "info", "message": "alice joined"}),
            json!({"type": "receiver.updated", "receiver": {"name": "alice", "isOnline": true}}),
        ];
        assert_eq!(drain(&mut watcher.rx), broadcast);

        let mut own = broadcast.clone();
        own.push(json!({
            "type": "init.success",
            "receivers": {"alice": {"name": "alice", "isOnline": true}}
        }));
        assert_eq!(drain(&mut alice.rx), own);
    }

    #[test]
    fn repeated_init_is_ignored() {
        let state = state_with(NamePolicy::Overwrite);
        let mut alice = open_peer(&state);
        let mut session = Session::new(&state, alice.id, &alice.tx);
        session.handle_text(INIT_ALICE);
        drain(&mut alice.rx);

        session.handle_text(r#"{"type":"init","sender":"mallory"}"#);
        assert_eq!(session.status.name(), Some("alice"));
        assert!(drain(&mut alice.rx).is_empty());
        assert!(state.clients.lookup("mallory").is_none());
    }

    #[test]
    fn message_is_relayed_and_acknowledged() {
        let state = state_with(NamePolicy::Overwrite);
        let mut alice = open_peer(&state);
        let mut bob = open_peer(&state);
        let mut alice_session = Session::new(&state, alice.id, &alice.tx);
        let mut bob_session = Session::new(&state, bob.id, &bob.tx);
        alice_session.handle_text(INIT_ALICE);
        bob_session.handle_text(INIT_BOB);
        drain(&mut alice.rx);
        drain(&mut bob.rx);

        alice_session
            .handle_text(r#"{"type":"message","sender":"alice","receiver":"bob","message":"hi"}"#);

        assert_eq!(
            drain(&mut bob.rx),
            vec![json!({"type": "message", "sender": "alice", "message": "hi"})]
        );
        assert_eq!(
            drain(&mut alice.rx),
            vec![json!({"type": "message.success", "sender": "alice", "receiver": "bob", "message": "hi"})]
        );
    }

    #[test]
    fn message_to_offline_receiver_is_still_acknowledged() {
        let state = state_with(NamePolicy::Overwrite);
        let mut alice = open_peer(&state);
        let mut bob = open_peer(&state);
        let mut alice_session = Session::new(&state, alice.id, &alice.tx);
        let mut bob_session = Session::new(&state, bob.id, &bob.tx);
        alice_session.handle_text(INIT_ALICE);
        bob_session.handle_text(INIT_BOB);
        bob_session.close();
        drain(&mut alice.rx);
        drain(&mut bob.rx);

        alice_session
            .handle_text(r#"{"type":"message","sender":"alice","receiver":"bob","message":"late"}"#);
        alice_session
            .handle_text(r#"{"type":"message","sender":"alice","receiver":"ghost","message":"boo"}"#);

        assert!(drain(&mut bob.rx).is_empty());
        assert_eq!(
            drain(&mut alice.rx),
            vec![
                json!({"type": "message.success", "sender": "alice", "receiver": "bob", "message": "late"}),
                json!({"type": "message.success", "sender": "alice", "receiver": "ghost", "message": "boo"}),
            ]
        );
    }

    #[test]
    fn unregistered_message_is_dropped() {
        let state = state_with(NamePolicy::Overwrite);
        let mut bob = open_peer(&state);
        let mut stranger = open_peer(&state);
        let mut bob_session = Session::new(&state, bob.id, &bob.tx);
        bob_session.handle_text(INIT_BOB);
        drain(&mut bob.rx);
        drain(&mut stranger.rx);

        let mut stranger_session = Session::new(&state, stranger.id, &stranger.tx);
        stranger_session
            .handle_text(r#"{"type":"message","sender":"x","receiver":"bob","message":"hi"}"#);

        assert!(drain(&mut bob.rx).is_empty());
        assert!(drain(&mut stranger.rx).is_empty());
    }

    #[test]
    fn malformed_and_unknown_frames_produce_nothing() {
        let state = state_with(NamePolicy::Overwrite);
        let mut peer = open_peer(&state);
        let mut session = Session::new(&state, peer.id, &peer.tx);
        session.handle_text("{not json");
        session.handle_text(r#"{"type":"typing"}"#);
        session.handle_text(r#"{"type":"message","sender":"a"}"#);
        session.handle_binary(&[0xff, 0x00]);
        assert_eq!(session.status, ConnectionState::Unregistered);
        assert!(drain(&mut peer.rx).is_empty());
    }

    #[test]
    fn binary_init_is_accepted() {
        let state = state_with(NamePolicy::Overwrite);
        let peer = open_peer(&state);
        let mut session = Session::new(&state, peer.id, &peer.tx);
        session.handle_binary(br#"{"type":"init","sender":"carol"}"#);
        assert_eq!(session.status.name(), Some("carol"));
    }

    #[test]
    fn reject_policy_keeps_newcomer_unregistered() {
        let state = state_with(NamePolicy::Reject);
        let mut first = open_peer(&state);
        let mut second = open_peer(&state);
        let mut first_session = Session::new(&state, first.id, &first.tx);
        first_session.handle_text(INIT_ALICE);
        drain(&mut first.rx);
        drain(&mut second.rx);

        let mut session = Session::new(&state, second.id, &second.tx);
        session.handle_text(INIT_ALICE);
        assert_eq!(session.status, ConnectionState::Unregistered);

        assert_eq!(
            drain(&mut second.rx),
            vec![json!({"type": "info", "message": "Name alice is already taken"})]
        );
        assert!(drain(&mut first.rx).is_empty());
        assert_eq!(state.clients.route_target("alice"), Some(first.id));
    }

    #[test]
    fn overwrite_hands_name_to_newest_connection() {
        let state = state_with(NamePolicy::Overwrite);
        let mut first = open_peer(&state);
        let mut second = open_peer(&state);
        let mut first_session = Session::new(&state, first.id, &first.tx);
        let mut second_session = Session::new(&state, second.id, &second.tx);
        first_session.handle_text(INIT_ALICE);
        second_session.handle_text(INIT_ALICE);
        drain(&mut first.rx);
        drain(&mut second.rx);

        // The detached connection can no longer speak as "alice".
        first_session.handle_text(
            r#"{"type":"message","sender":"alice","receiver":"alice","message":"still me?"}"#,
        );
        assert_eq!(first_session.status, ConnectionState::Unregistered);
        assert!(drain(&mut first.rx).is_empty());
        assert!(drain(&mut second.rx).is_empty());

        // The detached connection leaving must not take "alice" offline.
        assert!(first_session.close().is_none());
        assert!(drain(&mut second.rx).is_empty());
        assert_eq!(state.clients.route_target("alice"), Some(second.id));
    }

    #[test]
    fn detached_connection_can_register_again() {
        let state = state_with(NamePolicy::Overwrite);
        let mut first = open_peer(&state);
        let second = open_peer(&state);
        let mut first_session = Session::new(&state, first.id, &first.tx);
        let mut second_session = Session::new(&state, second.id, &second.tx);
        first_session.handle_text(INIT_ALICE);
        second_session.handle_text(INIT_ALICE);
        drain(&mut first.rx);

        first_session.handle_text(INIT_BOB);
        assert_eq!(
            first_session.status,
            ConnectionState::Registered {
                name: "bob".to_string()
            }
        );
        let frames = drain(&mut first.rx);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2]["type"], "init.success");
        assert_eq!(state.clients.route_target("alice"), Some(second.id));
        assert_eq!(state.clients.route_target("bob"), Some(first.id));
    }

    #[test]
    fn close_announces_leave_once() {
        let state = state_with(NamePolicy::Overwrite);
        let mut watcher = open_peer(&state);
        let alice = open_peer(&state);

        let mut session = Session::new(&state, alice.id, &alice.tx);
        session.handle_text(INIT_ALICE);
        drain(&mut watcher.rx);

        assert_eq!(session.close(), Some(ClientRecord::new("alice", false)));
        assert!(session.close().is_none());
        assert!(handle_close(&state, alice.id).is_none());

        assert_eq!(
            drain(&mut watcher.rx),
            vec![
                json!({"type": "receiver.updated", "receiver": {"name": "alice", "isOnline": false}}),
                json!({"type": "info", "message": "alice left"}),
            ]
        );
        assert!(!state.connections.contains_key(&alice.id));
        assert_eq!(
            state.clients.lookup("alice"),
            Some(ClientRecord::new("alice", false))
        );
    }

    #[test]
    fn close_of_unregistered_connection_is_silent() {
        let state = state_with(NamePolicy::Overwrite);
        let mut watcher = open_peer(&state);
        let stranger = open_peer(&state);

        let mut session = Session::new(&state, stranger.id, &stranger.tx);
        assert!(session.close().is_none());
        assert!(drain(&mut watcher.rx).is_empty());
        assert!(!state.connections.contains_key(&stranger.id));
    }

    #[test]
    fn dropping_session_closes_it() {
        let state = state_with(NamePolicy::Overwrite);
        let mut watcher = open_peer(&state);
        let alice = open_peer(&state);
        {
            let mut session = Session::new(&state, alice.id, &alice.tx);
            session.handle_text(INIT_ALICE);
        }
        let frames = drain(&mut watcher.rx);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3], json!({"type": "info", "message": "alice left"}));
        assert_eq!(state.clients.route_target("alice"), None);
    }

    #[test]
    fn closed_session_ignores_frames() {
        let state = state_with(NamePolicy::Overwrite);
        let peer = open_peer(&state);
        let mut session = Session::new(&state, peer.id, &peer.tx);
        session.close();
        session.handle_text(r#"{"type":"init","sender":"late"}"#);
        assert!(state.clients.lookup("late").is_none());
    }
}
