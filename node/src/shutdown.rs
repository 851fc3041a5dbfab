//! Graceful shutdown coordination.
//!
//! A watch channel carries a single "shutting down" flag. Subsystems grab a
//! [`ShutdownSignal`] and `select!` on [`ShutdownSignal::triggered`]
//! alongside their main loop; subscribers that arrive after the trigger
//! still observe it.

use tokio::signal;
use tokio::sync::watch;

/// Shutdown trigger shared across all node subsystems.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Get a signal that resolves once shutdown is triggered.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown programmatically.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { tracing::info!("received SIGINT, shutting down"); }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
        }

        self.trigger();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// One subsystem's view of the shutdown flag.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves when shutdown has been triggered (possibly already).
    pub async fn triggered(&mut self) {
        // A closed channel means the controller is gone; treat as shutdown.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_resolves_subscribers() {
        let controller = ShutdownController::new();
        let mut signal = controller.subscribe();
        controller.trigger();
        signal.triggered().await;
    }

    #[tokio::test]
    async fn late_subscriber_still_observes_trigger() {
        let controller = ShutdownController::new();
        controller.trigger();
        let mut signal = controller.subscribe();
        signal.triggered().await;
    }

    #[tokio::test]
    async fn multiple_subscribers_all_resolve() {
        let controller = ShutdownController::new();
        let mut one = controller.subscribe();
        let mut two = controller.subscribe();
        controller.trigger();
        one.triggered().await;
        two.triggered().await;
    }
}
