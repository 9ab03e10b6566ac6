//! Presence Broadcaster
//!
//! Fans messages out to every registered connection. Delivery always iterates
//! a snapshot taken from the registry, so concurrent register/unregister calls
//! never observe or corrupt an in-progress broadcast.

use std::sync::Arc;

use crate::infrastructure::metrics;
use crate::shared::clock::now_millis;
use crate::shared::protocol::{StatusUpdate, WireMessage};

use super::registry::ConnectionRegistry;

/// Upper bound on consecutive presence re-announcements after pruning.
/// Each round strictly shrinks the registry, so this only caps pathological churn.
const MAX_ANNOUNCE_ROUNDS: usize = 8;

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sockets the frame was queued on
    pub delivered: usize,
    /// Sockets whose transport already reported itself closed
    pub skipped: usize,
    /// Users unregistered because delivery to their socket failed
    pub pruned: Vec<String>,
}

/// Fan-out over a shared registry
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize `message` once and send it to every open socket.
    pub fn broadcast(&self, message: &WireMessage) -> BroadcastReport {
        match message.to_text() {
            Ok(text) => self.broadcast_text(Arc::from(text)),
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "Failed to serialize broadcast");
                BroadcastReport::default()
            }
        }
    }

    /// Send an already-serialized frame to every open socket.
    ///
    /// A failed send never aborts delivery to the remaining sockets; the failing
    /// socket is unregistered and reported in `pruned`.
    pub fn broadcast_text(&self, text: Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for record in self.registry.snapshot_all() {
            if !record.socket.is_open() {
                report.skipped += 1;
                metrics::record_broadcast("skipped");
                continue;
            }

            if record.socket.send_text(Arc::clone(&text)) {
                report.delivered += 1;
                metrics::record_broadcast("delivered");
            } else {
                metrics::record_broadcast("failed");
                tracing::warn!(
                    user_id = %record.user_id,
                    socket_id = %record.socket.id(),
                    "Broadcast delivery failed, dropping connection"
                );
                if self
                    .registry
                    .unregister_socket(&record.user_id, record.socket.id())
                {
                    report.pruned.push(record.user_id);
                }
            }
        }

        tracing::debug!(
            delivered = report.delivered,
            skipped = report.skipped,
            pruned = report.pruned.len(),
            "Broadcast complete"
        );

        report
    }

    /// Build a `status_update` reflecting the current registry membership.
    pub fn status_update(&self) -> WireMessage {
        let data = self
            .registry
            .snapshot_all()
            .iter()
            .map(|record| record.presence_entry())
            .collect();

        WireMessage::StatusUpdate(StatusUpdate {
            data,
            timestamp: now_millis(),
        })
    }

    /// Broadcast the current presence set.
    ///
    /// If delivery failures shrink the registry, the reduced membership is
    /// announced again.
    pub fn announce_presence(&self) {
        for _ in 0..MAX_ANNOUNCE_ROUNDS {
            let report = self.broadcast(&self.status_update());
            if report.pruned.is_empty() {
                return;
            }
        }
        tracing::warn!("Presence announcement kept pruning connections, giving up");
    }

    /// Relay an inbound chat frame verbatim to every connection, sender included.
    pub fn relay(&self, text: Arc<str>) -> BroadcastReport {
        let report = self.broadcast_text(text);
        if !report.pruned.is_empty() {
            self.announce_presence();
        }
        report
    }
}
