//! One-shot rescan timer.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Single-shot timer that runs a callback once after a delay.
///
/// Arming replaces any pending firing. The timer is never periodic; the
/// owner re-arms it explicitly.
pub(crate) struct RescanTimer {
    callback: Arc<dyn Fn() + Send + Sync>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RescanTimer {
    pub(crate) fn new(callback: Arc<dyn Fn() + Send + Sync>, shutdown: CancellationToken) -> Self {
        Self {
            callback,
            handle: Mutex::new(None),
            shutdown,
        }
    }

    /// Fires the callback after `delay`, replacing a pending firing.
    pub(crate) fn arm(&self, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        trace!(delay_ms = delay.as_millis() as u64, "Rescan timer armed");
        let callback = self.callback.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => callback(),
            }
        });
        if let Some(previous) = self.handle.lock().replace(task) {
            previous.abort();
        }
    }

    /// Arms the timer unless a firing is already pending.
    pub(crate) fn ensure_armed(&self, delay: Duration) {
        if !self.is_armed() {
            self.arm(delay);
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels a pending firing.
    pub(crate) fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
