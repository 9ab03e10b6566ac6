//! Connection Manager
//!
//! Sans-IO heartbeat/reconnect state machine. Every input (caller request,
//! socket event, fired timer) returns the list of `Command`s the runtime must
//! carry out. Socket events are tagged with the epoch of the attempt that
//! produced them; events from an older epoch are ignored.

use std::time::Duration;

use serde::Serialize;

use super::quality::{classify, LatencyTracker, Quality, QualityThresholds};
use super::scheduler::{TimerKind, TimerSlots, TimerToken};
use super::state::{
    ClientConnectionState, HeartbeatStats, DISCONNECTED_BY_CALLER, MAX_RETRIES_EXCEEDED,
    NOT_STARTED,
};
use crate::config::{Backoff, ClientSettings};
use crate::shared::protocol::{ChatMessage, Ping, WireMessage};

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a new socket for `epoch`
    Open { epoch: u64 },
    /// Write a frame on the current socket
    Send(WireMessage),
    /// Close the current socket, if any
    CloseSocket,
    Schedule { token: TimerToken, after: Duration },
    Cancel(TimerKind),
    CancelAll,
    /// Hand an application message to the caller
    Deliver(WireMessage),
}

/// Point-in-time view published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ClientConnectionState,
    pub quality: Quality,
    pub stats: HeartbeatStats,
    pub last_rtt_ms: Option<u64>,
    /// When the current socket was verified, epoch ms
    #[serde(skip)]
    pub opened_at: Option<i64>,
}

impl ConnectionSnapshot {
    /// The same snapshot with uptime measured up to `now`
    pub fn at(mut self, now: i64) -> Self {
        self.stats.connection_uptime_ms = match (self.state.is_connected(), self.opened_at) {
            (true, Some(opened_at)) => (now - opened_at).max(0) as u64,
            _ => 0,
        };
        self
    }
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ClientConnectionState::Closed(NOT_STARTED.into()),
            quality: Quality::Disconnected,
            stats: HeartbeatStats::default(),
            last_rtt_ms: None,
            opened_at: None,
        }
    }
}

pub struct ConnectionManager {
    settings: ClientSettings,
    thresholds: QualityThresholds,
    state: ClientConnectionState,
    timers: TimerSlots,
    epoch: u64,
    /// Attempt number of the socket currently connecting; 0 for the initial one
    attempt: u32,
    /// Timestamp of the outstanding probe
    pending_ping: Option<i64>,
    latency: LatencyTracker,
    total_pings: u64,
    total_pongs: u64,
    opened_at: Option<i64>,
}

impl ConnectionManager {
    pub fn new(settings: ClientSettings) -> Self {
        let thresholds = QualityThresholds::from(&settings);
        Self {
            settings,
            thresholds,
            state: ClientConnectionState::Closed(NOT_STARTED.into()),
            timers: TimerSlots::new(),
            epoch: 0,
            attempt: 0,
            pending_ping: None,
            latency: LatencyTracker::new(),
            total_pings: 0,
            total_pongs: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> &ClientConnectionState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn quality(&self) -> Quality {
        classify(&self.state, self.latency.last_rtt_ms(), &self.thresholds)
    }

    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.latency.last_rtt_ms()
    }

    pub fn stats(&self, now: i64) -> HeartbeatStats {
        let connection_uptime_ms = match (self.state.is_connected(), self.opened_at) {
            (true, Some(opened_at)) => (now - opened_at).max(0) as u64,
            _ => 0,
        };

        HeartbeatStats {
            total_pings: self.total_pings,
            total_pongs: self.total_pongs,
            average_latency_ms: self.latency.average_ms(),
            connection_uptime_ms,
        }
    }

    pub fn snapshot(&self, now: i64) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state.clone(),
            quality: self.quality(),
            stats: self.stats(now),
            last_rtt_ms: self.last_rtt_ms(),
            opened_at: self.opened_at,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), capped at the max delay
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_delay_ms;
        let steps = attempt.max(1);
        let delay = match self.settings.backoff {
            Backoff::Linear => base.saturating_mul(u64::from(steps)),
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(steps - 1).unwrap_or(u64::MAX);
                base.saturating_mul(factor)
            }
        };
        Duration::from_millis(delay.min(self.settings.max_retry_delay_ms))
    }

    /// Start a fresh connection. Any current socket is dropped and the
    /// heartbeat counters are reset.
    pub fn connect(&mut self, _now: i64) -> Vec<Command> {
        let mut commands = Vec::new();
        if !self.state.is_closed() {
            tracing::info!(state = %self.state, "Manual reconnect requested");
            commands.push(Command::CloseSocket);
        }

        self.timers.cancel_all();
        commands.push(Command::CancelAll);

        self.total_pings = 0;
        self.total_pongs = 0;
        self.latency.reset();
        self.pending_ping = None;
        self.opened_at = None;

        self.begin_attempt(0, &mut commands);
        commands
    }

    /// Caller-initiated shutdown; terminal until the next `connect`
    pub fn disconnect(&mut self) -> Vec<Command> {
        if self.state.is_closed() {
            return Vec::new();
        }
        self.close_terminal(DISCONNECTED_BY_CALLER)
    }

    /// A socket finished its transport handshake. Returns whether the
    /// runtime should keep it.
    pub fn on_socket_opened(&mut self, epoch: u64) -> bool {
        let current = epoch == self.epoch && self.state == ClientConnectionState::Connecting;
        if !current {
            tracing::debug!(epoch, current_epoch = self.epoch, "Discarding stale socket");
        }
        current
    }

    pub fn on_message(&mut self, epoch: u64, message: WireMessage, now: i64) -> Vec<Command> {
        if epoch != self.epoch {
            return Vec::new();
        }

        match message {
            WireMessage::ConnectionSuccess(success) => {
                if self.state != ClientConnectionState::Connecting {
                    tracing::debug!(state = %self.state, "Unexpected connection_success ignored");
                    return Vec::new();
                }
                tracing::info!(
                    user_id = %success.user_id,
                    attempt = self.attempt,
                    "Connection verified"
                );
                self.enter_open(now)
            }
            WireMessage::Pong(pong) => {
                let matches_ping = self.state == ClientConnectionState::AwaitingPong
                    && self.pending_ping == Some(pong.original_ping_time);
                if !matches_ping {
                    tracing::trace!(
                        original_ping_time = pong.original_ping_time,
                        "Ignoring unmatched pong"
                    );
                    return Vec::new();
                }

                let rtt = (now - pong.original_ping_time).max(0) as u64;
                self.latency.record(rtt);
                self.total_pongs += 1;
                self.pending_ping = None;
                self.state = ClientConnectionState::Open;
                self.timers.cancel(TimerKind::PongTimeout);
                tracing::debug!(rtt_ms = rtt, quality = ?self.quality(), "Pong received");

                vec![Command::Cancel(TimerKind::PongTimeout)]
            }
            WireMessage::StatusUpdate(_) | WireMessage::ChatMessage(_) => {
                // a socket given up on may still flush frames before it closes
                if !self.state.is_live() {
                    tracing::debug!(state = %self.state, kind = message.kind(), "Frame after connection loss dropped");
                    return Vec::new();
                }
                vec![Command::Deliver(message)]
            }
            WireMessage::Ping(_) => Vec::new(),
        }
    }

    pub fn on_socket_closed(&mut self, epoch: u64, reason: &str, now: i64) -> Vec<Command> {
        if epoch != self.epoch {
            return Vec::new();
        }

        match self.state {
            ClientConnectionState::Connecting => self.attempt_failed(reason),
            ClientConnectionState::Open | ClientConnectionState::AwaitingPong => {
                self.connection_lost(reason, now)
            }
            ClientConnectionState::Reconnecting(_) | ClientConnectionState::Closed(_) => Vec::new(),
        }
    }

    pub fn on_timer(&mut self, token: TimerToken, now: i64) -> Vec<Command> {
        if !self.timers.fire(token) {
            return Vec::new();
        }

        match (token.kind, self.state.clone()) {
            (TimerKind::Heartbeat, ClientConnectionState::Open) => {
                self.pending_ping = Some(now);
                self.total_pings += 1;
                self.state = ClientConnectionState::AwaitingPong;

                let ping = WireMessage::Ping(Ping {
                    user_id: self.settings.user_id.clone(),
                    timestamp: now,
                });
                let pong_timeout = self.schedule(TimerKind::PongTimeout, self.pong_timeout());
                let heartbeat = self.schedule(TimerKind::Heartbeat, self.ping_interval());
                vec![Command::Send(ping), pong_timeout, heartbeat]
            }
            (TimerKind::Heartbeat, ClientConnectionState::AwaitingPong) => {
                vec![self.schedule(TimerKind::Heartbeat, self.ping_interval())]
            }
            (TimerKind::PongTimeout, ClientConnectionState::AwaitingPong) => {
                tracing::warn!(
                    timeout_ms = self.settings.pong_timeout_ms,
                    "Pong timeout, connection considered lost"
                );
                self.connection_lost("pong timeout", now)
            }
            (TimerKind::Handshake, ClientConnectionState::Connecting) => {
                self.attempt_failed("handshake timeout")
            }
            (TimerKind::Reconnect, ClientConnectionState::Reconnecting(attempt)) => {
                let mut commands = Vec::new();
                self.begin_attempt(attempt, &mut commands);
                commands
            }
            _ => Vec::new(),
        }
    }

    /// Build an outgoing chat frame; only sent over a verified socket
    pub fn send_chat(&mut self, message: String, now: i64) -> Vec<Command> {
        if !self.state.is_connected() {
            tracing::warn!(state = %self.state, "Chat message dropped, not connected");
            return Vec::new();
        }

        vec![Command::Send(WireMessage::ChatMessage(ChatMessage {
            user_id: self.settings.user_id.clone(),
            username: self.settings.username.clone(),
            message,
            timestamp: now,
        }))]
    }

    fn begin_attempt(&mut self, attempt: u32, commands: &mut Vec<Command>) {
        self.epoch += 1;
        self.attempt = attempt;
        self.state = ClientConnectionState::Connecting;
        tracing::debug!(epoch = self.epoch, attempt, "Opening socket");

        commands.push(Command::Open { epoch: self.epoch });
        // connection_success must arrive within the pong timeout
        commands.push(self.schedule(TimerKind::Handshake, self.pong_timeout()));
    }

    fn enter_open(&mut self, now: i64) -> Vec<Command> {
        self.state = ClientConnectionState::Open;
        self.attempt = 0;
        self.opened_at = Some(now);
        self.pending_ping = None;
        self.latency.reset();
        self.timers.cancel(TimerKind::Handshake);

        vec![
            Command::Cancel(TimerKind::Handshake),
            self.schedule(TimerKind::Heartbeat, self.ping_interval()),
        ]
    }

    fn connection_lost(&mut self, reason: &str, _now: i64) -> Vec<Command> {
        tracing::warn!(reason, "Connection lost");
        self.pending_ping = None;
        self.opened_at = None;
        self.timers.cancel(TimerKind::Heartbeat);
        self.timers.cancel(TimerKind::PongTimeout);

        let mut commands = vec![
            Command::Cancel(TimerKind::Heartbeat),
            Command::Cancel(TimerKind::PongTimeout),
            Command::CloseSocket,
        ];
        commands.extend(self.schedule_retry(1));
        commands
    }

    fn attempt_failed(&mut self, reason: &str) -> Vec<Command> {
        tracing::warn!(reason, attempt = self.attempt, "Connection attempt failed");
        self.timers.cancel(TimerKind::Handshake);

        let mut commands = vec![Command::Cancel(TimerKind::Handshake), Command::CloseSocket];
        commands.extend(self.schedule_retry(self.attempt + 1));
        commands
    }

    fn schedule_retry(&mut self, attempt: u32) -> Vec<Command> {
        if attempt > self.settings.max_retries {
            tracing::error!(
                max_retries = self.settings.max_retries,
                "Giving up on reconnecting"
            );
            return self.close_terminal(MAX_RETRIES_EXCEEDED);
        }

        let delay = self.backoff_delay(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.state = ClientConnectionState::Reconnecting(attempt);
        vec![self.schedule(TimerKind::Reconnect, delay)]
    }

    fn close_terminal(&mut self, reason: &str) -> Vec<Command> {
        self.state = ClientConnectionState::Closed(reason.to_string());
        self.timers.cancel_all();
        self.pending_ping = None;
        self.opened_at = None;
        // in-flight opens from this point on belong to a dead epoch
        self.epoch += 1;

        vec![Command::CancelAll, Command::CloseSocket]
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) -> Command {
        Command::Schedule {
            token: self.timers.arm(kind),
            after,
        }
    }

    fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.settings.ping_interval_ms)
    }

    fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.pong_timeout_ms)
    }
}
