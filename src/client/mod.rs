//! Heartbeat Client
//!
//! Keeps one presence socket alive: periodic probes, RTT-based quality,
//! and bounded reconnects with backoff.

pub mod manager;
pub mod quality;
pub mod runner;
pub mod scheduler;
pub mod state;

pub use manager::{Command, ConnectionManager, ConnectionSnapshot};
pub use quality::{classify, LatencyTracker, Quality, QualityThresholds};
pub use runner::{endpoint_url, spawn, ClientHandle};
pub use scheduler::{TimerDriver, TimerKind, TimerSlots, TimerToken};
pub use state::{ClientConnectionState, HeartbeatStats};
