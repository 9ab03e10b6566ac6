//! Connection Registry
//!
//! Authoritative, process-local table of live connections keyed by user id.
//! Owned by `AppState` and injected into every session; there is no global map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::infrastructure::metrics;
use crate::shared::protocol::PresenceEntry;

/// Frame queued for a socket's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Close,
}

/// Cloneable write side of one WebSocket connection.
///
/// `is_open` reflects the transport state as seen by the server: it turns false
/// once a close has been requested. A writer task that died without a close
/// still reports open, and sends to it fail.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: Uuid,
    sender: mpsc::UnboundedSender<Outbound>,
    closing: Arc<AtomicBool>,
}

impl SocketHandle {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a handle together with the receiver its writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire)
    }

    /// Queue a text frame. Returns false if the writer is gone.
    pub fn send_text(&self, text: Arc<str>) -> bool {
        self.sender.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the writer to send a close frame and stop.
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.sender.send(Outbound::Close);
    }
}

/// One registered connection
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub user_id: String,
    pub username: String,
    pub socket: SocketHandle,
    pub connected_at: DateTime<Utc>,
    pub last_ping_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn presence_entry(&self) -> PresenceEntry {
        PresenceEntry {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            is_online: true,
            last_seen: self.last_ping_at.timestamp_millis(),
        }
    }
}

/// Live connections, at most one per user id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket for `user_id`, replacing any existing entry.
    ///
    /// Returns the replaced record. Closing the replaced socket is the caller's job.
    pub fn register(
        &self,
        user_id: &str,
        username: &str,
        socket: SocketHandle,
    ) -> Option<ConnectionRecord> {
        let now = Utc::now();
        let record = ConnectionRecord {
            user_id: user_id.to_string(),
            username: username.to_string(),
            socket,
            connected_at: now,
            last_ping_at: now,
        };

        let (previous, count) = {
            let mut connections = self.connections.lock();
            let previous = connections.insert(user_id.to_string(), record);
            (previous, connections.len())
        };
        metrics::set_active_connections(count);

        tracing::info!(
            user_id = %user_id,
            username = %username,
            replaced = previous.is_some(),
            connected = count,
            "Connection registered"
        );

        previous
    }

    /// Remove the entry for `user_id`. No-op if absent.
    pub fn unregister(&self, user_id: &str) -> Option<ConnectionRecord> {
        let (removed, count) = {
            let mut connections = self.connections.lock();
            let removed = connections.remove(user_id);
            (removed, connections.len())
        };

        if removed.is_some() {
            metrics::set_active_connections(count);
            tracing::info!(user_id = %user_id, connected = count, "Connection unregistered");
        }

        removed
    }

    /// Remove the entry for `user_id` only if it still belongs to `socket_id`.
    ///
    /// A socket that has already been replaced by a newer connection for the
    /// same user must not evict its successor.
    pub fn unregister_socket(&self, user_id: &str, socket_id: Uuid) -> bool {
        let count = {
            let mut connections = self.connections.lock();
            match connections.get(user_id) {
                Some(record) if record.socket.id() == socket_id => {
                    connections.remove(user_id);
                    connections.len()
                }
                _ => return false,
            }
        };

        metrics::set_active_connections(count);
        tracing::info!(
            user_id = %user_id,
            socket_id = %socket_id,
            connected = count,
            "Connection unregistered"
        );
        true
    }

    /// Record a liveness probe for the given socket. Returns false if the
    /// socket is no longer the registered one.
    pub fn touch(&self, user_id: &str, socket_id: Uuid) -> bool {
        let mut connections = self.connections.lock();
        match connections.get_mut(user_id) {
            Some(record) if record.socket.id() == socket_id => {
                record.last_ping_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of every record, oldest connection first.
    ///
    /// The lock is released before this returns, so callers may perform I/O
    /// on the result while other sessions register or unregister.
    pub fn snapshot_all(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> =
            self.connections.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        records
    }

    pub fn get(&self, user_id: &str) -> Option<ConnectionRecord> {
        self.connections.lock().get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
