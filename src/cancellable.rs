use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Shared shutdown signal for the watcher's worker tasks.
///
/// Cloning hands out another handle to the same signal; once cancelled it stays
/// cancelled.
#[derive(Clone, Debug)]
pub struct Cancellable {
    inner: Arc<CancellableInner>,
}

#[derive(Debug)]
struct CancellableInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellableInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}
