//! In-flight forward tracking.
//!
//! # Responsibilities
//! - Count forwards currently waiting on an upstream
//! - Let the shutdown path wait for that count to reach zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Global atomic counter for forward IDs.
/// Relaxed ordering is enough; IDs only need to be unique.
static FORWARD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tracked forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardId(u64);

impl ForwardId {
    pub fn new() -> Self {
        Self(FORWARD_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ForwardId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ForwardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fwd-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Inner {
    active: AtomicU64,
    idle: Notify,
}

/// Tracks in-flight forwards for graceful shutdown.
///
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new in-flight forward. The guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ForwardId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until no forward is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent drop can't be missed.
            notified.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard held for the lifetime of one forward.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<Inner>,
    id: ForwardId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ForwardId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
        tracing::trace!(forward_id = %self.id, "Forward finished");
    }
}
