//! Client Connection State

use std::fmt;

use serde::Serialize;

/// Terminal reason after reconnect attempts are used up
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Terminal reason after a caller-initiated disconnect
pub const DISCONNECTED_BY_CALLER: &str = "disconnected by caller";

/// Reason before the first connection request
pub const NOT_STARTED: &str = "not started";

/// Connection state owned by a `ConnectionManager`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ClientConnectionState {
    /// Socket opening or waiting for `connection_success`
    Connecting,
    Open,
    /// Probe sent, response pending
    AwaitingPong,
    /// Waiting before reconnect attempt `n`
    Reconnecting(u32),
    Closed(String),
}

impl ClientConnectionState {
    /// Whether a verified socket is up
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ClientConnectionState::Open | ClientConnectionState::AwaitingPong
        )
    }

    /// Whether the current socket is still in use, verified or not
    pub fn is_live(&self) -> bool {
        self.is_connected() || *self == ClientConnectionState::Connecting
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ClientConnectionState::Closed(_))
    }
}

impl fmt::Display for ClientConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientConnectionState::Connecting => write!(f, "connecting"),
            ClientConnectionState::Open => write!(f, "open"),
            ClientConnectionState::AwaitingPong => write!(f, "awaiting_pong"),
            ClientConnectionState::Reconnecting(attempt) => write!(f, "reconnecting({})", attempt),
            ClientConnectionState::Closed(reason) => write!(f, "closed({})", reason),
        }
    }
}

/// Heartbeat counters, accumulated until a manual reconnect
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStats {
    pub total_pings: u64,
    pub total_pongs: u64,
    /// Running mean over RTTs since the current socket opened
    pub average_latency_ms: f64,
    /// Time since the current socket became `Open`; zero while not connected
    pub connection_uptime_ms: u64,
}
