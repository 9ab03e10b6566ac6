//! Cancellable Timers
//!
//! Every armed timer carries a generation number. A timer is only honoured if
//! its generation is still the armed one for its kind, so a late fire from a
//! cancelled or superseded timer is a detectable no-op.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Next heartbeat probe
    Heartbeat,
    /// Deadline for the outstanding probe's pong
    PongTimeout,
    /// Deadline for `connection_success` after opening a socket
    Handshake,
    /// Delay before the next reconnect attempt
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Pure bookkeeping of which timer generation is live per kind
#[derive(Debug, Default)]
pub struct TimerSlots {
    next_generation: u64,
    armed: HashMap<TimerKind, u64>,
}

impl TimerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind`, superseding any timer of the same kind
    pub fn arm(&mut self, kind: TimerKind) -> TimerToken {
        self.next_generation += 1;
        self.armed.insert(kind, self.next_generation);
        TimerToken {
            kind,
            generation: self.next_generation,
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.armed.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.armed.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Consume a fired token. Returns false for stale or cancelled timers.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        match self.armed.get(&token.kind) {
            Some(&generation) if generation == token.generation => {
                self.armed.remove(&token.kind);
                true
            }
            _ => false,
        }
    }
}

/// Tokio-backed timers that deliver fired tokens on a channel
pub struct TimerDriver {
    tx: mpsc::UnboundedSender<TimerToken>,
    tasks: HashMap<TimerKind, JoinHandle<()>>,
}

impl TimerDriver {
    pub fn new(tx: mpsc::UnboundedSender<TimerToken>) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
        }
    }

    /// Deliver `token` after `after`, aborting any pending timer of the same kind
    pub fn schedule(&mut self, token: TimerToken, after: Duration) {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(token);
        });
        if let Some(previous) = self.tasks.insert(token.kind, task) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(task) = self.tasks.remove(&kind) {
            task.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
