//! Presence Wire Protocol
//!
//! JSON message vocabulary shared by the server session handler and the
//! heartbeat client. Every frame is an object with a `type` discriminator;
//! field names are camelCase and timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// Client -> server liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    #[serde(default)]
    pub user_id: String,
    pub timestamp: i64,
}

/// Server -> client probe acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub user_id: String,
    /// Server time when the pong was produced
    pub timestamp: i64,
    /// Echo of the probe's `timestamp`, used for matching
    pub original_ping_time: i64,
}

/// Sent once right after a socket has been registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSuccess {
    pub user_id: String,
    pub username: String,
    pub timestamp: i64,
}

/// One row of a presence broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub username: String,
    pub is_online: bool,
    pub last_seen: i64,
}

/// Membership/liveness snapshot broadcast to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub data: Vec<PresenceEntry>,
    pub timestamp: i64,
}

/// Opaque chat payload relayed to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: String,
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

/// Every message type understood by this protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Ping(Ping),
    Pong(Pong),
    ConnectionSuccess(ConnectionSuccess),
    StatusUpdate(StatusUpdate),
    ChatMessage(ChatMessage),
}

/// Result of decoding an inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Known(WireMessage),
    /// Well-formed envelope with a `type` this protocol does not know
    Unknown(String),
}

impl WireMessage {
    pub const KNOWN_TYPES: [&'static str; 5] = [
        "ping",
        "pong",
        "connection_success",
        "status_update",
        "chat_message",
    ];

    /// Wire name of this message's `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Ping(_) => "ping",
            WireMessage::Pong(_) => "pong",
            WireMessage::ConnectionSuccess(_) => "connection_success",
            WireMessage::StatusUpdate(_) => "status_update",
            WireMessage::ChatMessage(_) => "chat_message",
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Decode a text frame.
///
/// Malformed JSON, a missing `type`, or a known type with an invalid payload
/// are errors. An unknown `type` is not an error: callers log and ignore it.
pub fn decode(text: &str) -> Result<Decoded, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !WireMessage::KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(Decoded::Unknown(kind));
    }

    serde_json::from_value(value)
        .map(Decoded::Known)
        .map_err(|source| ProtocolError::InvalidPayload { kind, source })
}
