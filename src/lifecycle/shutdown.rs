//! Shutdown coordination for the router.

use tokio::sync::watch;

/// Process-wide lifecycle.
///
/// ```text
/// Running → Draining → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting and serving traffic.
    Running,
    /// No new connections; in-flight work is finishing.
    Draining,
    /// Drain finished or timed out.
    Stopped,
}

/// Coordinator for graceful shutdown.
///
/// Long-running tasks wait on [`Shutdown::draining`]; the state itself is a
/// watch channel so late subscribers still see a drain that already began.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<ShutdownState>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ShutdownState::Running);
        Self { tx }
    }

    pub fn state(&self) -> ShutdownState {
        *self.tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.tx.subscribe()
    }

    /// Move from Running to Draining. Returns false if a drain already began.
    pub fn begin_drain(&self) -> bool {
        let started = self.tx.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });
        if started {
            tracing::info!("Draining: no longer accepting connections");
        }
        started
    }

    /// Mark the drain complete.
    pub fn finish(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ShutdownState::Stopped {
                false
            } else {
                *state = ShutdownState::Stopped;
                true
            }
        });
    }

    /// Resolves once the state has left Running.
    pub async fn draining(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel can't close here.
        let _ = rx.wait_for(|state| *state != ShutdownState::Running).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
