//! Top-level cancellation signal (§5): a SIGINT/SIGTERM trigger that every
//! work loop observes at its next suspension point within ≤ 1 s.
//!
//! Grounded on `at-harness/shutdown.rs::ShutdownSignal`, trimmed to the
//! subset the work loop actually needs — a broadcast-style "shutting down"
//! flag every loop polls via `tokio::sync::watch`, rather than the
//! teacher's additional drain-count bookkeeping (no component here needs
//! to report how many in-flight items it drained; `destroy_all` already
//! gives a deterministic reap point).

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A receiver that work loops select on alongside their own I/O.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    /// Idempotent: a second call is a no-op.
    pub fn trigger(&self) {
        let _ = self.tx.send_if_modified(|shutting_down| {
            if *shutting_down {
                false
            } else {
                *shutting_down = true;
                true
            }
        });
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_every_subscriber() {
        let signal = ShutdownSignal::new();
        let mut rx1 = signal.subscribe();
        let mut rx2 = signal.subscribe();

        assert!(!signal.is_shutting_down());
        signal.trigger();
        rx1.changed().await.unwrap();
        rx2.changed().await.unwrap();
        assert!(*rx1.borrow());
        assert!(*rx2.borrow());
        assert!(signal.is_shutting_down());
    }

    #[test]
    fn trigger_twice_is_idempotent() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_shutting_down());
    }
}
