//! Retention sweeper — background task that prunes old checks.
//!
//! The store is expected to expire old history on its own as well; this
//! loop bounds the check log even if that never happens.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::storage::SharedStore;

/// Checks older than this are deleted.
pub const RETENTION_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Time between sweeps.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(6 * 60 * 60);

/// Periodically deletes checks older than the retention window.
pub struct RetentionSweeper {
    store: SharedStore,
    period: Duration,
    retention: Duration,
}

impl RetentionSweeper {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            period: SWEEP_PERIOD,
            retention: RETENTION_WINDOW,
        }
    }

    /// Override the sweep period (for testing).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Prune once. Failures are logged and left for the next sweep.
    pub fn sweep(&self) -> Option<u64> {
        let retention = match chrono::Duration::from_std(self.retention) {
            Ok(retention) => retention,
            Err(e) => {
                warn!(error = %e, "retention window out of range, skipping sweep");
                return None;
            }
        };
        let cutoff = Utc::now() - retention;
        match self.store.prune_checks(cutoff) {
            Ok(pruned) => {
                debug!(pruned, %cutoff, "retention sweep complete");
                Some(pruned)
            }
            Err(e) => {
                warn!(error = %e, "retention sweep failed");
                None
            }
        }
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = self.period.as_secs(),
            retention_secs = self.retention.as_secs(),
            "retention sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("retention sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.period) => {
                    self.sweep();
                }
            }
        }
    }
}
