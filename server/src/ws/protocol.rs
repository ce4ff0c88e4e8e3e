//! JSON wire protocol: one text frame per logical message, tagged by `type`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chat::registry::ClientRecord;
use crate::ws::ConnectionSender;

/// Greeting sent to every connection as soon as it opens.
pub const WELCOME_MESSAGE: &str = "Welcome! Enter your name and start chatting.";

/// A decoded client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `{type: "init", sender}`
    Init { sender: String },
    /// `{type: "message", sender, receiver, message}`
    Message(ChatMessage),
    /// Any other `type`. Ignored by the router.
    Unknown { kind: String },
}

/// A direct message as submitted by its sender. Relayed once, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub receiver: String,
    pub message: String,
}

#[derive(Deserialize)]
struct InitFields {
    sender: String,
}

/// Server-to-client frames. Field sets are exactly what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "info")]
    Info { message: String },

    #[serde(rename = "init.success")]
    InitSuccess {
        receivers: BTreeMap<String, ClientRecord>,
    },

    /// Relayed message; the receiver is implicit.
    #[serde(rename = "message")]
    Message { sender: String, message: String },

    #[serde(rename = "message.success")]
    MessageSuccess {
        sender: String,
        receiver: String,
        message: String,
    },

    #[serde(rename = "receiver.updated")]
    ReceiverUpdated { receiver: ClientRecord },
}

impl ServerFrame {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    /// Serialize into a WebSocket text message.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server frame");
                None
            }
        }
    }
}

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Binary payload that is not UTF-8 text
    NotUtf8,
    /// Payload is not a JSON document
    InvalidJson(String),
    /// No string `type` field
    MissingType,
    /// A known `type` with missing or mistyped fields
    InvalidFields { kind: &'static str, reason: String },
    /// `init` with a blank name
    EmptyName,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotUtf8 => write!(f, "Binary frame is not valid UTF-8"),
            Self::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            Self::MissingType => write!(f, "Frame has no string \"type\" field"),
            Self::InvalidFields { kind, reason } => {
                write!(f, "Invalid \"{}\" frame: {}", kind, reason)
            }
            Self::EmptyName => write!(f, "Sender name is empty"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Decode one inbound text payload.
///
/// Unknown `type` values decode to [`ClientFrame::Unknown`] rather than an
/// error, so callers can ignore them without treating them as malformed.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(FrameError::MissingType)?
        .to_string();

    match kind.as_str() {
        "init" => {
            let fields: InitFields =
                serde_json::from_value(value).map_err(|e| FrameError::InvalidFields {
                    kind: "init",
                    reason: e.to_string(),
                })?;
            if fields.sender.trim().is_empty() {
                return Err(FrameError::EmptyName);
            }
            Ok(ClientFrame::Init {
                sender: fields.sender,
            })
        }
        "message" => {
            let message: ChatMessage =
                serde_json::from_value(value).map_err(|e| FrameError::InvalidFields {
                    kind: "message",
                    reason: e.to_string(),
                })?;
            Ok(ClientFrame::Message(message))
        }
        _ => Ok(ClientFrame::Unknown { kind }),
    }
}

/// Decode a binary payload carrying the same JSON as a text frame.
pub fn decode_binary_frame(data: &[u8]) -> Result<ClientFrame, FrameError> {
    let text = std::str::from_utf8(data).map_err(|_| FrameError::NotUtf8)?;
    decode_client_frame(text)
}

/// Encode and queue a frame on one connection's outbound channel.
/// Returns false if the connection's writer has already gone away.
pub fn send_frame(tx: &ConnectionSender, frame: &ServerFrame) -> bool {
    match frame.to_message() {
        Some(msg) => tx.send(msg).is_ok(),
        None => false,
    }
}
