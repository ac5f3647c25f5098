//! Cancellation of a reconciliation run.
//!
//! Raising cancellation stops services that have not started yet; services
//! already executing their plan finish it so no half-applied footprint is left
//! behind by an interrupted call.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Why the run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGINT signal received (Ctrl+C)
    Interrupt,
    /// SIGTERM signal received
    Terminate,
    /// Programmatic cancellation requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Cloneable handle shared by the orchestrator and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    signal: Arc<OnceLock<ShutdownSignal>>,
}

impl CancellationHandle {
    /// Create a handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise cancellation.
    ///
    /// Returns `false` if it was already raised; the first signal wins.
    pub fn cancel(&self, signal: ShutdownSignal) -> bool {
        let first = self.signal.set(signal).is_ok();
        if first {
            info!(signal = %signal, "Cancellation requested, no new services will start");
        } else {
            info!("Cancellation already in progress, ignoring duplicate signal");
        }
        first
    }

    /// Check if cancellation has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.get().is_some()
    }

    /// The signal that raised cancellation, if any.
    #[must_use]
    pub fn signal(&self) -> Option<ShutdownSignal> {
        self.signal.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_wins() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();

        assert!(!handle.is_cancelled());
        assert!(clone.cancel(ShutdownSignal::Interrupt));
        assert!(!handle.cancel(ShutdownSignal::Terminate));

        assert!(handle.is_cancelled());
        assert_eq!(handle.signal(), Some(ShutdownSignal::Interrupt));
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
