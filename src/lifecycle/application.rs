//! Application lifetime notifications.

use tokio_util::sync::CancellationToken;

/// Started/stopping/stopped notifications for the running application.
///
/// Registered as a hosting service so application code can observe the host
/// and request a stop through [`stop_application`](Self::stop_application).
#[derive(Debug, Clone, Default)]
pub struct ApplicationLifetime {
    started: CancellationToken,
    stopping: CancellationToken,
    stopped: CancellationToken,
}

impl ApplicationLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled once the server is listening.
    pub fn application_started(&self) -> CancellationToken {
        self.started.clone()
    }

    /// Cancelled when a stop was requested or disposal began.
    pub fn application_stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Cancelled once disposal completed.
    pub fn application_stopped(&self) -> CancellationToken {
        self.stopped.clone()
    }

    /// Request the host to stop.
    pub fn stop_application(&self) {
        if !self.stopping.is_cancelled() {
            tracing::info!("Application stop requested");
        }
        self.stopping.cancel();
    }

    pub(crate) fn notify_started(&self) {
        self.started.cancel();
    }

    pub(crate) fn notify_stopping(&self) {
        self.stopping.cancel();
    }

    pub(crate) fn notify_stopped(&self) {
        self.stopped.cancel();
    }
}
