//! # Presence Server Library
//!
//! WebSocket presence and heartbeat layer:
//! - Server: connection registry, presence broadcaster and per-socket sessions
//! - HTTP: health and online-user endpoints for dashboards
//! - Client: heartbeat probes, RTT quality and reconnect with backoff
//!
//! ## Module Structure
//!
//! ```text
//! presence_server/
//! +-- client/         Heartbeat client state machine and runtime
//! +-- config/         Configuration management
//! +-- infrastructure/ Prometheus metrics
//! +-- presentation/   HTTP routes and WebSocket sessions
//! +-- shared/         Wire protocol, errors, clock
//! ```

// Heartbeat client
pub mod client;

// Configuration module
pub mod config;

// Infrastructure layer - Metrics
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
