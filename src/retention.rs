// Periodic cleanup of aged time-series rows and recovered alerts.

use crate::repo::Repository;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

pub struct Retention {
    repo: Arc<Repository>,
    retention_days: i64,
}

impl Retention {
    pub fn new(repo: Arc<Repository>, retention_days: i64) -> Self {
        let retention_days = if retention_days <= 0 {
            14
        } else {
            retention_days
        };
        Self {
            repo,
            retention_days,
        }
    }

    /// Idempotent; errors are logged and swallowed.
    pub async fn run(&self) {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        match self.repo.delete_older_than(cutoff).await {
            Ok(()) => info!(%cutoff, "retention cleanup completed"),
            Err(e) => error!(error = %e, "retention cleanup failed"),
        }
    }
}
