//! Retention purge (the deletion contract).
//!
//! Nothing in this crate schedules a purge; callers pass explicit cutoffs.

use analytics_core::{to_millis, PurgeReport, RetentionCutoffs};
use tracing::info;

use crate::client::SqliteStore;
use crate::error::StoreResult;

impl SqliteStore {
    /// Deletes raw rows strictly older than the cutoffs.
    ///
    /// Sessions are deleted by last activity, so an open session is never
    /// removed while it still receives events.
    pub async fn purge_before(&self, cutoffs: &RetentionCutoffs) -> StoreResult<PurgeReport> {
        let mut tx = self.pool().begin().await?;

        let events = sqlx::query("DELETE FROM events WHERE timestamp < ?1")
            .bind(to_millis(cutoffs.events))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let sessions = sqlx::query("DELETE FROM sessions WHERE last_activity < ?1")
            .bind(to_millis(cutoffs.sessions))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let searches = sqlx::query("DELETE FROM search_records WHERE timestamp < ?1")
            .bind(to_millis(cutoffs.searches))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let performance_samples = sqlx::query("DELETE FROM performance_samples WHERE timestamp < ?1")
            .bind(to_millis(cutoffs.performance))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let report = PurgeReport {
            events,
            sessions,
            searches,
            performance_samples,
        };
        info!(
            events,
            sessions,
            searches,
            performance_samples,
            "Purged expired analytics rows"
        );
        Ok(report)
    }
}
