//! Shutdown coordination for the gateway.

use std::sync::Arc;
use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Backed by a watch channel, so subscribers created after the trigger
/// still observe it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal. Later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered. Dropping every [`Shutdown`]
    /// handle counts as a trigger.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let mut signal = shutdown.subscribe();
        tokio::time::timeout(Duration::from_millis(100), signal.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn waits_until_triggered() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        assert!(tokio::time::timeout(Duration::from_millis(20), signal.recv())
            .await
            .is_err());

        let trigger = shutdown.clone();
        tokio::spawn(async move { trigger.trigger() });
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .unwrap();
    }
}
