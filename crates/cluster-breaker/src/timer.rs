//! One-shot recovery timer.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Cancellable one-shot timer running on a tokio runtime.
///
/// Dropping the timer cancels it. Cancellation cannot interrupt an expiry
/// callback that has already started, so callbacks must re-check that the
/// work they were scheduled for is still current.
pub(crate) struct RecoveryTimer {
    task: JoinHandle<()>,
}

impl RecoveryTimer {
    /// Runs `on_expiry` once, `delay` from now.
    pub(crate) fn schedule<F>(runtime: &Handle, delay: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_expiry();
        });
        Self { task }
    }

    pub(crate) fn cancel(self) {
        drop(self);
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RecoveryTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
