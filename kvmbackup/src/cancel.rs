//! Run-wide cancellation flag.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{BackupError, Result};

/// Set once when the operator interrupts the run; never cleared.
///
/// Clones share the same flag. Waits go through [`Cancellation::sleep`] so
/// they end as soon as the flag is set. Disk copies never poll it.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag and wake every pending wait.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleep for `duration`, or fail with [`BackupError::Cancelled`] if the
    /// flag is set first (or already set).
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(BackupError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
