//! Cooperative cancellation shared by every wait point and in-flight
//! request of a punch cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::PunchError;

/// Clonable cancellation signal. Cloning is cheap and shares state; once
/// cancelled, a token stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep that aborts with [`PunchError::Cancelled`] when the token
    /// fires first.
    pub async fn wait(&self, duration: Duration) -> Result<(), PunchError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(PunchError::Cancelled),
        }
    }

    /// Race `fut` against cancellation. On cancel the future is dropped,
    /// aborting any in-flight I/O it owns.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, PunchError> {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(PunchError::Cancelled),
        }
    }
}
