//! WebSocket Presence Gateway
//!
//! Connection registry, broadcaster and per-socket session handling.

pub mod broadcast;
pub mod handler;
pub mod registry;
pub mod session;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use handler::ws_handler;
pub use registry::{ConnectionRecord, ConnectionRegistry, Outbound, SocketHandle};
pub use session::{ConnectParams, HandshakeOutcome, Session, SessionPhase};
