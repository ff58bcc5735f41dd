//! Trailing-edge debounce for persistence and push
//!
//! Keystroke-level edits must not each rewrite the snapshot file and the
//! remote blob. One cancellable deferred task is owned per collection kind;
//! scheduling while a task is pending aborts it and restarts the delay, so a
//! superseded timer can never fire.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Owned handle to at most one pending deferred action.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Debouncer {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            handle: None,
        }
    }

    /// Schedule `action` to run after the delay, cancelling any pending one.
    pub fn schedule<F, Fut>(&mut self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.cancel();
        let delay = self.delay;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        }));
    }

    /// Cancel the pending action, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a deferred action is still waiting to fire.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
