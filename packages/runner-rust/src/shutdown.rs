//! Stop request for a relocation run.
//!
//! The driver checks [`ShutdownController::is_shutdown_requested`] before each
//! page, so a request stops pagination while the current page runs to
//! completion. Rows are never interrupted mid-write.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

/// One-way stop flag shared by the signal handler and the batch driver.
#[derive(Debug)]
pub struct ShutdownController {
    requested: watch::Sender<bool>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { requested: tx }
    }

    /// Requests a stop. Idempotent.
    pub fn trigger_shutdown(&self) {
        self.requested.send_replace(true);
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        *self.requested.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn requested(&self) {
        let mut rx = self.requested.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Spawns a task that requests a stop on the first Ctrl-C.
    pub fn stop_on_ctrl_c(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current page");
                controller.trigger_shutdown();
            }
        });
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn trigger_sets_flag_once() {
        let controller = ShutdownController::new();
        assert!(!controller.is_shutdown_requested());
        controller.trigger_shutdown();
        controller.trigger_shutdown();
        assert!(controller.is_shutdown_requested());
    }

    #[tokio::test]
    async fn requested_resolves_after_trigger() {
        let controller = Arc::new(ShutdownController::new());
        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.requested().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn requested_is_immediate_when_already_stopped() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_millis(100), controller.requested())
            .await
            .unwrap();
    }
}
