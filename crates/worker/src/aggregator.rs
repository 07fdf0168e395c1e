//! Daily rollup aggregation.
//!
//! A run computes every venue and content item seen on one date and
//! replace-upserts its rollup row. Entities fail independently: a failure is
//! recorded in the bookkeeping table and retried on the next scheduled pass
//! while the rest of the run proceeds.

use std::collections::HashSet;
use std::sync::Arc;

use analytics_core::{EntityKind, EntityRef, Error, Result, StatWindow};
use analytics_store::{AggregationRun, RollupStore};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use telemetry::metrics;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity: EntityRef,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    pub venues: u64,
    pub contents: u64,
    pub failures: Vec<EntityFailure>,
}

impl AggregationReport {
    fn record_success(&mut self, entity: EntityRef) {
        match entity.kind {
            EntityKind::Venue => self.venues += 1,
            EntityKind::Content => self.contents += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregationOutcome {
    Completed(AggregationReport),
    /// Another run for the same date holds the guard; nothing was done.
    AlreadyRunning,
}

/// Dates touched by one scheduled pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DueReport {
    pub aggregated: Vec<NaiveDate>,
    pub retried: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
}

type RunningSet = Arc<Mutex<HashSet<NaiveDate>>>;

/// Releases a date's claim when the run finishes or is cancelled.
struct DateGuard {
    running: RunningSet,
    date: NaiveDate,
}

impl Drop for DateGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.date);
    }
}

pub struct Aggregator<R: RollupStore> {
    store: Arc<R>,
    running: RunningSet,
    lookback_days: u32,
}

impl<R: RollupStore> Clone for Aggregator<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            running: self.running.clone(),
            lookback_days: self.lookback_days,
        }
    }
}

impl<R: RollupStore> Aggregator<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self {
            store,
            running: Arc::new(Mutex::new(HashSet::new())),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }

    pub fn is_running(&self, date: NaiveDate) -> bool {
        self.running.lock().contains(&date)
    }

    fn try_claim(&self, date: NaiveDate) -> Option<DateGuard> {
        let mut running = self.running.lock();
        if !running.insert(date) {
            return None;
        }
        Some(DateGuard {
            running: self.running.clone(),
            date,
        })
    }

    /// Aggregates every entity seen on `date`.
    ///
    /// Only days strictly before the current UTC date can be closed; an open
    /// day is rejected with `VALID_002` before any work.
    pub async fn run_for_date(&self, date: NaiveDate) -> Result<AggregationOutcome> {
        self.run_for_date_at(date, Utc::now()).await
    }

    pub async fn run_for_date_at(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AggregationOutcome> {
        let today = now.date_naive();
        if date >= today {
            return Err(Error::invalid_date_range(format!(
                "{date} is not closed yet; only dates before {today} can be aggregated"
            )));
        }

        let Some(_guard) = self.try_claim(date) else {
            debug!(%date, "Aggregation already running, ignoring trigger");
            return Ok(AggregationOutcome::AlreadyRunning);
        };

        info!(%date, "Starting aggregation run");
        self.store.begin_run(date, now).await?;

        let previously_failed: HashSet<EntityRef> =
            self.store.failed_entities(date).await?.into_iter().collect();
        let entities = self.store.day_entities(date).await?;

        let mut report = AggregationReport::default();
        for entity in entities {
            match self.aggregate_entity(entity, date).await {
                Ok(()) => {
                    report.record_success(entity);
                    if previously_failed.contains(&entity) {
                        self.store.clear_failure(date, entity).await?;
                    }
                }
                Err(e) => {
                    self.note_failure(date, entity, &e, now).await;
                    report.failures.push(EntityFailure {
                        entity,
                        error: e.to_string(),
                    });
                }
            }
        }

        // a failure here leaves the run open, so the next pass redoes the day
        let activity = self.store.compute_activity(date).await?;
        self.store.replace_activity(&activity).await?;

        self.store
            .complete_run(&AggregationRun {
                date,
                status: analytics_store::RUN_COMPLETED.to_string(),
                started_at: now,
                completed_at: Some(Utc::now().max(now)),
                venues: report.venues as i64,
                contents: report.contents as i64,
                failures: report.failures.len() as i64,
            })
            .await?;

        metrics().aggregation_runs.inc();
        self.refresh_failure_gauge().await;

        info!(
            %date,
            venues = report.venues,
            contents = report.contents,
            failures = report.failures.len(),
            "Aggregation run complete"
        );
        Ok(AggregationOutcome::Completed(report))
    }

    /// Recomputes only the entities recorded as failed for `date`.
    pub async fn retry_failures(&self, date: NaiveDate) -> Result<AggregationOutcome> {
        let Some(_guard) = self.try_claim(date) else {
            return Ok(AggregationOutcome::AlreadyRunning);
        };

        let now = Utc::now();
        let mut report = AggregationReport::default();
        for entity in self.store.failed_entities(date).await? {
            match self.aggregate_entity(entity, date).await {
                Ok(()) => {
                    self.store.clear_failure(date, entity).await?;
                    report.record_success(entity);
                }
                Err(e) => {
                    self.note_failure(date, entity, &e, now).await;
                    report.failures.push(EntityFailure {
                        entity,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.refresh_failure_gauge().await;
        if report.venues + report.contents > 0 || !report.failures.is_empty() {
            info!(
                %date,
                recovered = report.venues + report.contents,
                still_failing = report.failures.len(),
                "Retried failed entities"
            );
        }
        Ok(AggregationOutcome::Completed(report))
    }

    /// Scheduler entry point: closes every unaggregated date in the lookback
    /// window (strictly before `today`), then retries outstanding failures.
    pub async fn run_due(&self, today: NaiveDate) -> Result<DueReport> {
        let window = StatWindow::new(
            today - Duration::days(i64::from(self.lookback_days)),
            today - Duration::days(1),
        )?;

        let mut due = DueReport::default();
        for date in self.store.pending_dates(window).await? {
            match self.run_for_date(date).await {
                Ok(AggregationOutcome::Completed(_)) => due.aggregated.push(date),
                Ok(AggregationOutcome::AlreadyRunning) => due.skipped.push(date),
                Err(e) => error!(%date, error = %e, "Aggregation run failed"),
            }
        }

        for date in self.store.failure_dates().await? {
            if date >= today || due.aggregated.contains(&date) {
                continue;
            }
            match self.retry_failures(date).await {
                Ok(AggregationOutcome::Completed(_)) => due.retried.push(date),
                Ok(AggregationOutcome::AlreadyRunning) => due.skipped.push(date),
                Err(e) => error!(%date, error = %e, "Failure retry failed"),
            }
        }

        Ok(due)
    }

    async fn aggregate_entity(&self, entity: EntityRef, date: NaiveDate) -> Result<()> {
        let rollup = self.store.compute_rollup(entity, date).await?;
        self.store.replace_rollup(&rollup).await?;
        Ok(())
    }

    async fn note_failure(
        &self,
        date: NaiveDate,
        entity: EntityRef,
        err: &analytics_core::Error,
        now: DateTime<Utc>,
    ) {
        warn!(%date, %entity, error = %err, "Entity aggregation failed");
        if let Err(e) = self.store.record_failure(date, entity, &err.to_string(), now).await {
            error!(%date, %entity, error = %e, "Failed to record aggregation failure");
        }
    }

    async fn refresh_failure_gauge(&self) {
        match self.store.outstanding_failures().await {
            Ok(count) => metrics().aggregation_entity_failures.set(count),
            Err(e) => warn!(error = %e, "Failed to count outstanding aggregation failures"),
        }
    }
}
