//! Latency Tracking and Connection Quality
//!
//! Quality is always derived from the current state and the most recent RTT;
//! it is never stored on its own.

use serde::Serialize;

use super::state::ClientConnectionState;
use crate::config::ClientSettings;

/// Discrete connection quality label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Poor,
    Disconnected,
}

/// RTT cut points, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityThresholds {
    /// Below this is `Excellent`
    pub excellent_ms: u64,
    /// Below this is `Good`
    pub good_ms: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_ms: 100,
            good_ms: 300,
        }
    }
}

impl From<&ClientSettings> for QualityThresholds {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            excellent_ms: settings.excellent_rtt_ms,
            good_ms: settings.good_rtt_ms,
        }
    }
}

/// Classify connection quality.
///
/// Any state other than `Open`/`AwaitingPong` is `Disconnected`; a probe that
/// timed out has already moved the state to `Reconnecting`. A verified socket
/// without an RTT sample yet is `Good`.
pub fn classify(
    state: &ClientConnectionState,
    last_rtt_ms: Option<u64>,
    thresholds: &QualityThresholds,
) -> Quality {
    if !state.is_connected() {
        return Quality::Disconnected;
    }

    match last_rtt_ms {
        None => Quality::Good,
        Some(rtt) if rtt < thresholds.excellent_ms => Quality::Excellent,
        Some(rtt) if rtt < thresholds.good_ms => Quality::Good,
        Some(_) => Quality::Poor,
    }
}

/// Running RTT statistics for the current socket
#[derive(Debug, Clone, Default)]
pub struct LatencyTracker {
    samples: u64,
    mean_ms: f64,
    last_rtt_ms: Option<u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rtt_ms: u64) {
        self.samples += 1;
        self.mean_ms += (rtt_ms as f64 - self.mean_ms) / self.samples as f64;
        self.last_rtt_ms = Some(rtt_ms);
    }

    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.last_rtt_ms
    }

    pub fn average_ms(&self) -> f64 {
        self.mean_ms
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
