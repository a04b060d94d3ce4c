//! One-shot shutdown notification.
//!
//! A [`ShutdownSignal`] fires at most once. Listeners that subscribe after it
//! fired still observe the fired state.

use std::sync::Arc;

use tokio::sync::watch;

/// One-shot broadcast signal.
///
/// Clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to the signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a [`ShutdownSignal`].
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wait until the signal fires. Returns immediately if it already has.
    ///
    /// Also returns when every [`ShutdownSignal`] handle was dropped.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_once() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn late_listener_sees_fired_state() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let mut listener = signal.subscribe();
        assert!(listener.is_triggered());
        tokio::time::timeout(Duration::from_millis(100), listener.wait())
            .await
            .expect("listener should not block");
    }

    #[tokio::test]
    async fn waiting_listener_is_woken() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();

        let waiter = tokio::spawn(async move {
            listener.wait().await;
        });

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
    }
}
