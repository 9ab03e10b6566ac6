//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauge (registry size)
//! - Inbound WebSocket messages by type
//! - Broadcast deliveries by outcome
//! - Rejected handshakes

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Registered WebSocket connections
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of registered WebSocket connections",
        )
        .namespace("presence_server"),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Inbound WebSocket messages by protocol type
pub static WEBSOCKET_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "websocket_messages_total",
            "Inbound WebSocket messages by type",
        )
        .namespace("presence_server"),
        &["type"], // protocol type, "unknown" or "malformed"
    )
    .expect("Failed to create WEBSOCKET_MESSAGES_TOTAL metric")
});

/// Broadcast fan-out outcomes per recipient
pub static BROADCAST_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "broadcast_deliveries_total",
            "Broadcast deliveries per recipient socket",
        )
        .namespace("presence_server"),
        &["outcome"], // "delivered", "skipped", "failed"
    )
    .expect("Failed to create BROADCAST_DELIVERIES_TOTAL metric")
});

/// Upgrades closed for missing identity
pub static HANDSHAKE_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "handshake_rejections_total",
            "WebSocket handshakes rejected for missing identity",
        )
        .namespace("presence_server"),
    )
    .expect("Failed to create HANDSHAKE_REJECTIONS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WEBSOCKET_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(WEBSOCKET_MESSAGES_TOTAL.clone()))
        .expect("Failed to register WEBSOCKET_MESSAGES_TOTAL");
    registry
        .register(Box::new(BROADCAST_DELIVERIES_TOTAL.clone()))
        .expect("Failed to register BROADCAST_DELIVERIES_TOTAL");
    registry
        .register(Box::new(HANDSHAKE_REJECTIONS_TOTAL.clone()))
        .expect("Failed to register HANDSHAKE_REJECTIONS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Helper to update the registered connection count
pub fn set_active_connections(count: usize) {
    WEBSOCKET_CONNECTIONS_ACTIVE.set(count as i64);
}

/// Helper to count an inbound message
pub fn record_inbound_message(kind: &str) {
    WEBSOCKET_MESSAGES_TOTAL.with_label_values(&[kind]).inc();
}

/// Helper to count one broadcast recipient
pub fn record_broadcast(outcome: &str) {
    BROADCAST_DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Helper to count a rejected handshake
pub fn record_handshake_rejection() {
    HANDSHAKE_REJECTIONS_TOTAL.inc();
}
