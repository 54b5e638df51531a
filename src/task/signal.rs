// src/task/signal.rs

use tokio::sync::watch;

/// A resettable boolean flag that any number of tasks can wait on.
///
/// Only the owning task sets and resets it; dependents and callers only read
/// or wait.
#[derive(Debug)]
pub struct RunSignal {
    tx: watch::Sender<bool>,
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|set| *set).await;
    }
}
