// Worker Shutdown Token

use tokio::sync::watch;

/// Shutdown signal shared by every worker and background loop.
///
/// A worker observes it between jobs only: an in-flight handler is never
/// interrupted by shutdown.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (immediately if it already was)
    pub async fn wait(&mut self) {
        // Err means the sender is gone, which also ends the wait
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Owner side of the shutdown signal
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to all tokens
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Another token for a loop started after the channel was created
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken { rx: self.tx.subscribe() }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
