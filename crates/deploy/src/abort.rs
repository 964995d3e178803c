//! Cooperative cancellation of a run.

use tokio::sync::watch;

use crate::{OrchestrationError, Result};

/// Receiving side of an abort signal.
///
/// Orchestrators consult it before every submission. Once a transaction is
/// on its way the signal is no longer honoured.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Create a connected trigger and signal.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Fail with `Aborted` when the signal has fired.
    pub fn check(&self, before: &'static str) -> Result<()> {
        if self.is_aborted() {
            tracing::warn!(stage = before, "Abort requested, stopping before submission");
            return Err(OrchestrationError::Aborted(before));
        }
        Ok(())
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::never()
    }
}

impl From<watch::Receiver<bool>> for AbortSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }
}
