//! Shutdown coordination.

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// The HTTP server, the dev worker and the reload socket each subscribe;
/// one trigger stops them all.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.recv().await;
    }

    /// Trigger on Ctrl+C. Runs until the signal arrives.
    pub async fn trigger_on_ctrl_c(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C; shutting down"),
        }
        self.trigger();
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_all_waiters() {
        let shutdown = Shutdown::new();
        let a = tokio::spawn({
            let s = shutdown.clone();
            async move { s.wait().await }
        });
        let b = tokio::spawn({
            let s = shutdown.clone();
            async move { s.wait().await }
        });
        while shutdown.receiver_count() < 2 {
            tokio::task::yield_now().await;
        }
        shutdown.trigger();
        a.await.unwrap();
        b.await.unwrap();
    }
}
