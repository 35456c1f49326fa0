//! Close signal shared by a balancer and its accept loop.

use tokio::sync::watch;

/// Level-triggered shutdown flag.
///
/// Unlike a broadcast, a receiver created after [`ShutdownSignal::shutdown`]
/// still observes the signal, so a `close` that races `serve` is not lost.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Re-arm the signal so a closed balancer can serve again.
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.sender.subscribe();
        // The sender lives in self, so wait_for only fails if it is dropped
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
