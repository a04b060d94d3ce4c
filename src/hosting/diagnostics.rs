//! Host diagnostics events.
//!
//! Each host owns its own [`DiagnosticSource`]; nothing is process-global, so
//! two hosts in one process do not see each other's events.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    HostStarting,
    HostStarted {
        addresses: Vec<SocketAddr>,
    },
    BeginRequest {
        trace_identifier: String,
        method: String,
        path: String,
    },
    EndRequest {
        trace_identifier: String,
        status: u16,
        elapsed: Duration,
    },
    UnhandledException {
        trace_identifier: String,
        error: String,
    },
    StartupFailed {
        error: String,
    },
    HostStopped,
}

/// Broadcast sink for [`DiagnosticEvent`]s.
///
/// Emitting without subscribers is a no-op. Slow subscribers lag and lose the
/// oldest events rather than blocking the host.
#[derive(Debug, Clone)]
pub struct DiagnosticSource {
    tx: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticSource {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: DiagnosticEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    /// Whether anyone is listening.
    pub fn is_enabled(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

impl Default for DiagnosticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let source = DiagnosticSource::new();
        assert!(!source.is_enabled());
        source.emit(DiagnosticEvent::HostStarting);

        let mut rx = source.subscribe();
        assert!(source.is_enabled());
        source.emit(DiagnosticEvent::HostStopped);
        assert_eq!(rx.recv().await.unwrap(), DiagnosticEvent::HostStopped);
    }
}
