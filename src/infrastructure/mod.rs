//! Infrastructure Layer
//!
//! Process-wide services: Prometheus metrics.

pub mod metrics;
