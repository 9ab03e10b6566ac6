//! WebSocket Session Management
//!
//! Per-socket state machine: `Handshaking -> Active -> Terminated`.
//! Transitions are plain method calls so the machine can be driven without a
//! real socket; `handler` adapts axum's socket events onto it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::infrastructure::metrics;
use crate::shared::clock::now_millis;
use crate::shared::protocol::{self, ConnectionSuccess, Decoded, Pong, WireMessage};

use super::broadcast::Broadcaster;
use super::registry::{ConnectionRegistry, SocketHandle};

/// Identity supplied as query parameters on the upgrade request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl ConnectParams {
    /// Lenient query parsing: never fails, first occurrence of a key wins,
    /// unrelated keys are ignored.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "userId" if params.user_id.is_none() => params.user_id = Some(value.into_owned()),
                "username" if params.username.is_none() => {
                    params.username = Some(value.into_owned())
                }
                _ => {}
            }
        }
        params
    }

    /// Both fields present and non-empty
    pub fn identity(&self) -> Option<(&str, &str)> {
        let user_id = self.user_id.as_deref().filter(|s| !s.is_empty())?;
        let username = self.username.as_deref().filter(|s| !s.is_empty())?;
        Some((user_id, username))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Handshaking,
    Active { user_id: String, username: String },
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accepted,
    Rejected,
}

/// Server side of one WebSocket connection
pub struct Session {
    socket: SocketHandle,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    phase: SessionPhase,
    last_heartbeat: Instant,
}

impl Session {
    pub fn new(registry: Arc<ConnectionRegistry>, socket: SocketHandle) -> Self {
        Self {
            socket,
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            phase: SessionPhase::Handshaking,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn socket_id(&self) -> uuid::Uuid {
        self.socket.id()
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.phase {
            SessionPhase::Active { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    /// Validate identity and, on success, register and announce the socket.
    ///
    /// Missing identity closes the socket without sending any payload.
    pub fn handshake(&mut self, params: &ConnectParams) -> HandshakeOutcome {
        if self.phase != SessionPhase::Handshaking {
            return HandshakeOutcome::Rejected;
        }

        let Some((user_id, username)) = params.identity() else {
            tracing::debug!(
                socket_id = %self.socket.id(),
                "Missing userId or username, closing connection"
            );
            metrics::record_handshake_rejection();
            self.socket.close();
            self.phase = SessionPhase::Terminated;
            return HandshakeOutcome::Rejected;
        };

        // must be queued before registration: it is the first frame on the socket
        self.send(&WireMessage::ConnectionSuccess(ConnectionSuccess {
            user_id: user_id.to_string(),
            username: username.to_string(),
            timestamp: now_millis(),
        }));

        if let Some(previous) = self.registry.register(user_id, username, self.socket.clone()) {
            if previous.socket.id() != self.socket.id() {
                tracing::info!(
                    user_id = %user_id,
                    old_socket_id = %previous.socket.id(),
                    "Closing connection replaced by a newer socket"
                );
                previous.socket.close();
            }
        }

        self.phase = SessionPhase::Active {
            user_id: user_id.to_string(),
            username: username.to_string(),
        };
        self.last_heartbeat = Instant::now();
        self.broadcaster.announce_presence();

        HandshakeOutcome::Accepted
    }

    /// Dispatch one inbound text frame. Malformed frames are logged and dropped.
    pub fn on_text(&mut self, text: &str) {
        let SessionPhase::Active { user_id, .. } = &self.phase else {
            return;
        };
        let user_id = user_id.clone();

        let message = match protocol::decode(text) {
            Ok(Decoded::Known(message)) => message,
            Ok(Decoded::Unknown(kind)) => {
                metrics::record_inbound_message("unknown");
                tracing::debug!(user_id = %user_id, kind = %kind, "Unknown message type");
                return;
            }
            Err(e) => {
                metrics::record_inbound_message("malformed");
                tracing::warn!(user_id = %user_id, error = %e, "Dropping malformed message");
                return;
            }
        };

        metrics::record_inbound_message(message.kind());

        match message {
            WireMessage::Ping(ping) => {
                self.last_heartbeat = Instant::now();
                self.registry.touch(&user_id, self.socket.id());
                let pong_user = if ping.user_id.is_empty() {
                    user_id.clone()
                } else {
                    ping.user_id
                };
                self.send(&WireMessage::Pong(Pong {
                    user_id: pong_user,
                    timestamp: now_millis(),
                    original_ping_time: ping.timestamp,
                }));
                tracing::trace!(user_id = %user_id, "Heartbeat received");
            }
            WireMessage::ChatMessage(_) => {
                self.broadcaster.relay(Arc::from(text));
            }
            other => {
                tracing::debug!(
                    user_id = %user_id,
                    kind = other.kind(),
                    "Ignoring server-bound message of client-only type"
                );
            }
        }
    }

    /// Whether no heartbeat arrived within `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() >= timeout
    }

    /// Leave the registry and announce the reduced membership.
    ///
    /// Idempotent. Returns true only for the call that actually removed the
    /// registration; a socket already replaced or unregistered broadcasts nothing.
    pub fn terminate(&mut self) -> bool {
        let phase = std::mem::replace(&mut self.phase, SessionPhase::Terminated);
        let SessionPhase::Active { user_id, .. } = phase else {
            return false;
        };

        if !self.registry.unregister_socket(&user_id, self.socket.id()) {
            return false;
        }

        self.broadcaster.announce_presence();
        true
    }

    fn send(&self, message: &WireMessage) {
        match message.to_text() {
            Ok(text) => {
                if !self.socket.send_text(Arc::from(text)) {
                    tracing::debug!(socket_id = %self.socket.id(), kind = message.kind(), "Socket writer gone");
                }
            }
            Err(e) => tracing::warn!(kind = message.kind(), error = %e, "Failed to serialize message"),
        }
    }
}
