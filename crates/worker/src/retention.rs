//! Retention purge executor.
//!
//! Runs only when an operator (or an external cron hitting the admin
//! endpoint) asks for it. Rollups and the audit log are never purged.

use analytics_core::{PurgeReport, Result, RetentionPolicy};
use analytics_store::SqliteStore;
use chrono::{DateTime, Utc};
use tracing::info;

pub struct RetentionWorker {
    store: SqliteStore,
    policy: RetentionPolicy,
}

impl RetentionWorker {
    pub fn new(store: SqliteStore, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub async fn run(&self) -> Result<PurgeReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let cutoffs = self.policy.cutoffs(now);
        info!(
            events_cutoff = %cutoffs.events,
            performance_cutoff = %cutoffs.performance,
            "Running retention purge"
        );
        let report = self.store.purge_before(&cutoffs).await?;
        info!(total = report.total(), "Retention purge complete");
        Ok(report)
    }
}
