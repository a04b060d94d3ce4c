//! Connection tracking for the hyper server.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count active connections
//! - Let shutdown wait until the count drops to zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Relaxed ordering: only uniqueness is needed.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts live connections. Clones share the count.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new connection. The count drops when the guard does.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        let id = ConnectionId::next();
        tracing::trace!(connection_id = %id, "Connection opened");
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until no connection is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
