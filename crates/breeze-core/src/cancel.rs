//! Per-request cancellation token
//!
//! One token is created per dispatch call and shared by the request façade
//! and every pending operation spawned while handling it. Firing it only
//! signals: running code observes it through [`CancellationToken::is_cancelled`]
//! or by awaiting [`CancellationToken::cancelled`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// Cloneable abort signal; all clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Returns false if it had already fired.
    pub fn cancel(&self, reason: Option<String>) -> bool {
        // reason is stored before the flag flips so readers never see a
        // cancelled token without its reason
        let mut slot = self.inner.reason.lock();
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        *slot = reason;
        self.inner.cancelled.store(true, Ordering::SeqCst);
        drop(slot);
        self.inner.notify.notify_waiters();
        true
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Resolves once the token fires (immediately if it already has)
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // register before checking the flag, otherwise a cancel between the
        // check and the await is lost
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
