//! Shared Utilities
//!
//! Common utilities used across the server and the heartbeat client.

pub mod clock;
pub mod error;
pub mod protocol;
