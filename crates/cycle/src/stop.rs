//! Stop signal for a running controller.

use std::sync::Arc;

use tokio::sync::watch;

/// Asks a running controller to stop after its current cycle.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// True once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A stop handle and the receiver to pass to `CycleController::run`.
pub fn stop_signal() -> (StopHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_wakes_receiver() {
        let (handle, mut rx) = stop_signal();
        assert!(!*rx.borrow());

        let waiter = tokio::spawn(async move {
            rx.changed().await.unwrap();
            *rx.borrow()
        });
        handle.stop();
        handle.stop();
        assert!(waiter.await.unwrap());
        assert!(handle.is_stopped());
    }
}
