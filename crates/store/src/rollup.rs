//! Daily rollups and aggregation bookkeeping.
//!
//! [`SqliteStore::compute_day_stat`] and [`SqliteStore::compute_day_activity`]
//! are the raw-day computations. The aggregator persists their results for
//! closed days; dashboards call them directly for the current day.

use analytics_core::{
    day_bounds, to_millis, DailyActivity, DailyRollup, DailyStat, EntityKind, EntityRef,
    StatWindow,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::client::SqliteStore;
use crate::error::{StoreError, StoreResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date_key(raw: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("date {raw}: {e}")))
}

/// Stored aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRun {
    pub date: NaiveDate,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub venues: i64,
    pub contents: i64,
    pub failures: i64,
}

pub const RUN_RUNNING: &str = "running";
pub const RUN_COMPLETED: &str = "completed";

/// Storage operations the aggregator depends on.
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Venues and content items referenced by events on `date`.
    async fn day_entities(&self, date: NaiveDate) -> StoreResult<Vec<EntityRef>>;

    /// Computes the rollup for one entity from raw events.
    async fn compute_rollup(&self, entity: EntityRef, date: NaiveDate) -> StoreResult<DailyRollup>;

    /// Replaces the stored rollup row.
    async fn replace_rollup(&self, rollup: &DailyRollup) -> StoreResult<()>;

    /// Visitors and event count across all entities on `date`.
    async fn compute_activity(&self, date: NaiveDate) -> StoreResult<DailyActivity>;

    async fn replace_activity(&self, activity: &DailyActivity) -> StoreResult<()>;

    async fn begin_run(&self, date: NaiveDate, at: DateTime<Utc>) -> StoreResult<()>;

    async fn complete_run(&self, run: &AggregationRun) -> StoreResult<()>;

    async fn record_failure(
        &self,
        date: NaiveDate,
        entity: EntityRef,
        error: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn clear_failure(&self, date: NaiveDate, entity: EntityRef) -> StoreResult<()>;

    async fn failed_entities(&self, date: NaiveDate) -> StoreResult<Vec<EntityRef>>;

    async fn failure_dates(&self) -> StoreResult<Vec<NaiveDate>>;

    async fn outstanding_failures(&self) -> StoreResult<u64>;

    /// Dates in `window` with raw events but no completed run.
    async fn pending_dates(&self, window: StatWindow) -> StoreResult<Vec<NaiveDate>>;
}

fn day_stat_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Venue => {
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN event_type = 'venue_view' THEN 1 ELSE 0 END), 0) AS views,
                COUNT(DISTINCT session_id) AS unique_visitors,
                COALESCE(SUM(CASE WHEN event_type IN ('content_view', 'story_view') THEN 1 ELSE 0 END), 0) AS content_views,
                COALESCE(SUM(CASE WHEN event_type = 'share' THEN 1 ELSE 0 END), 0) AS shares,
                COALESCE(SUM(CASE WHEN event_type = 'favorite' THEN 1 ELSE 0 END), 0) AS favorites
            FROM events
            WHERE venue_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            "#
        }
        EntityKind::Content => {
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN event_type = 'content_view' THEN 1 ELSE 0 END), 0) AS views,
                COUNT(DISTINCT session_id) AS unique_visitors,
                COALESCE(SUM(CASE WHEN event_type IN ('content_view', 'story_view') THEN 1 ELSE 0 END), 0) AS content_views,
                COALESCE(SUM(CASE WHEN event_type = 'share' THEN 1 ELSE 0 END), 0) AS shares,
                COALESCE(SUM(CASE WHEN event_type = 'favorite' THEN 1 ELSE 0 END), 0) AS favorites
            FROM events
            WHERE content_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            "#
        }
    }
}

impl SqliteStore {
    /// Computes one entity's statistic for `date` directly from raw events.
    pub async fn compute_day_stat(&self, entity: EntityRef, date: NaiveDate) -> StoreResult<DailyRollup> {
        let (start, end) = day_bounds(date);
        let row = sqlx::query(day_stat_sql(entity.kind))
            .bind(entity.id)
            .bind(to_millis(start))
            .bind(to_millis(end))
            .fetch_one(self.pool())
            .await?;

        let stats = DailyStat {
            views: row.try_get("views")?,
            unique_visitors: row.try_get("unique_visitors")?,
            content_views: row.try_get("content_views")?,
            shares: row.try_get("shares")?,
            favorites: row.try_get("favorites")?,
        };

        let venue_id = match entity.kind {
            EntityKind::Venue => Some(entity.id),
            EntityKind::Content => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT venue_id FROM events
                    WHERE content_id = ?1 AND venue_id IS NOT NULL AND timestamp >= ?2 AND timestamp < ?3
                    ORDER BY timestamp DESC, id DESC
                    LIMIT 1
                    "#,
                )
                .bind(entity.id)
                .bind(to_millis(start))
                .bind(to_millis(end))
                .fetch_optional(self.pool())
                .await?
            }
        };

        Ok(DailyRollup {
            kind: entity.kind,
            entity_id: entity.id,
            venue_id,
            date,
            stats,
        })
    }

    pub async fn write_rollup(&self, rollup: &DailyRollup) -> StoreResult<()> {
        let s = &rollup.stats;
        match rollup.kind {
            EntityKind::Venue => {
                sqlx::query(
                    r#"
                    INSERT INTO daily_venue_stats (venue_id, date, views, unique_visitors, content_views, shares, favorites)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(venue_id, date) DO UPDATE SET
                        views = excluded.views,
                        unique_visitors = excluded.unique_visitors,
                        content_views = excluded.content_views,
                        shares = excluded.shares,
                        favorites = excluded.favorites
                    "#,
                )
                .bind(rollup.entity_id)
                .bind(date_key(rollup.date))
                .bind(s.views)
                .bind(s.unique_visitors)
                .bind(s.content_views)
                .bind(s.shares)
                .bind(s.favorites)
                .execute(self.pool())
                .await?;
            }
            EntityKind::Content => {
                sqlx::query(
                    r#"
                    INSERT INTO daily_content_stats (content_id, date, venue_id, views, unique_visitors, content_views, shares, favorites)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(content_id, date) DO UPDATE SET
                        venue_id = excluded.venue_id,
                        views = excluded.views,
                        unique_visitors = excluded.unique_visitors,
                        content_views = excluded.content_views,
                        shares = excluded.shares,
                        favorites = excluded.favorites
                    "#,
                )
                .bind(rollup.entity_id)
                .bind(date_key(rollup.date))
                .bind(rollup.venue_id)
                .bind(s.views)
                .bind(s.unique_visitors)
                .bind(s.content_views)
                .bind(s.shares)
                .bind(s.favorites)
                .execute(self.pool())
                .await?;
            }
        }
        Ok(())
    }

    /// Distinct sessions and event count over every event on `date`.
    pub async fn compute_day_activity(&self, date: NaiveDate) -> StoreResult<DailyActivity> {
        let (start, end) = day_bounds(date);
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT session_id) AS unique_visitors, COUNT(*) AS events
            FROM events
            WHERE timestamp >= ?1 AND timestamp < ?2
            "#,
        )
        .bind(to_millis(start))
        .bind(to_millis(end))
        .fetch_one(self.pool())
        .await?;

        Ok(DailyActivity {
            date,
            unique_visitors: row.try_get("unique_visitors")?,
            events: row.try_get("events")?,
        })
    }

    pub async fn write_day_activity(&self, activity: &DailyActivity) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_activity (date, unique_visitors, events)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(date) DO UPDATE SET
                unique_visitors = excluded.unique_visitors,
                events = excluded.events
            "#,
        )
        .bind(date_key(activity.date))
        .bind(activity.unique_visitors)
        .bind(activity.events)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stored activity rows in `window`, oldest first. Days with no events are omitted.
    pub async fn activity_rollups(&self, window: StatWindow) -> StoreResult<Vec<DailyActivity>> {
        let rows = sqlx::query(
            r#"
            SELECT date, unique_visitors, events
            FROM daily_activity
            WHERE date >= ?1 AND date <= ?2 AND events > 0
            ORDER BY date
            "#,
        )
        .bind(date_key(window.start))
        .bind(date_key(window.end))
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<DailyActivity> {
                let date: String = row.try_get("date")?;
                Ok(DailyActivity {
                    date: parse_date_key(&date)?,
                    unique_visitors: row.try_get("unique_visitors")?,
                    events: row.try_get("events")?,
                })
            })
            .collect()
    }

    /// Stored rollups for one entity, oldest first.
    pub async fn rollups_for(&self, entity: EntityRef, window: StatWindow) -> StoreResult<Vec<DailyRollup>> {
        let sql = match entity.kind {
            EntityKind::Venue => {
                r#"
                SELECT venue_id AS entity_id, venue_id, date, views, unique_visitors, content_views, shares, favorites
                FROM daily_venue_stats
                WHERE venue_id = ?1 AND date >= ?2 AND date <= ?3
                ORDER BY date
                "#
            }
            EntityKind::Content => {
                r#"
                SELECT content_id AS entity_id, venue_id, date, views, unique_visitors, content_views, shares, favorites
                FROM daily_content_stats
                WHERE content_id = ?1 AND date >= ?2 AND date <= ?3
                ORDER BY date
                "#
            }
        };

        let rows = sqlx::query(sql)
            .bind(entity.id)
            .bind(date_key(window.start))
            .bind(date_key(window.end))
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<DailyRollup> {
                let date: String = row.try_get("date")?;
                Ok(DailyRollup {
                    kind: entity.kind,
                    entity_id: row.try_get("entity_id")?,
                    venue_id: row.try_get("venue_id")?,
                    date: parse_date_key(&date)?,
                    stats: DailyStat {
                        views: row.try_get("views")?,
                        unique_visitors: row.try_get("unique_visitors")?,
                        content_views: row.try_get("content_views")?,
                        shares: row.try_get("shares")?,
                        favorites: row.try_get("favorites")?,
                    },
                })
            })
            .collect()
    }

    pub async fn aggregation_run(&self, date: NaiveDate) -> StoreResult<Option<AggregationRun>> {
        let row = sqlx::query(
            "SELECT date, status, started_at, completed_at, venues, contents, failures FROM aggregation_runs WHERE date = ?1",
        )
        .bind(date_key(date))
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Most recent runs, newest date first.
    pub async fn recent_runs(&self, limit: u32) -> StoreResult<Vec<AggregationRun>> {
        let rows = sqlx::query(
            "SELECT date, status, started_at, completed_at, venues, contents, failures FROM aggregation_runs ORDER BY date DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(run_from_row).collect()
    }
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<AggregationRun> {
    let date: String = row.try_get("date")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    Ok(AggregationRun {
        date: parse_date_key(&date)?,
        status: row.try_get("status")?,
        started_at: analytics_core::from_millis(row.try_get("started_at")?),
        completed_at: completed_at.map(analytics_core::from_millis),
        venues: row.try_get("venues")?,
        contents: row.try_get("contents")?,
        failures: row.try_get("failures")?,
    })
}

fn entity_from_parts(kind: &str, id: i64) -> StoreResult<EntityRef> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e: analytics_core::Error| StoreError::Corrupt(e.to_string()))?;
    Ok(EntityRef { kind, id })
}

#[async_trait]
impl RollupStore for SqliteStore {
    async fn day_entities(&self, date: NaiveDate) -> StoreResult<Vec<EntityRef>> {
        let (start, end) = day_bounds(date);
        let rows = sqlx::query(
            r#"
            SELECT 'venue' AS kind, venue_id AS id FROM events
            WHERE venue_id IS NOT NULL AND timestamp >= ?1 AND timestamp < ?2
            UNION
            SELECT 'content' AS kind, content_id AS id FROM events
            WHERE content_id IS NOT NULL AND timestamp >= ?1 AND timestamp < ?2
            ORDER BY kind DESC, id
            "#,
        )
        .bind(to_millis(start))
        .bind(to_millis(end))
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<EntityRef> {
                let kind: String = row.try_get("kind")?;
                entity_from_parts(&kind, row.try_get("id")?)
            })
            .collect()
    }

    async fn compute_rollup(&self, entity: EntityRef, date: NaiveDate) -> StoreResult<DailyRollup> {
        self.compute_day_stat(entity, date).await
    }

    async fn replace_rollup(&self, rollup: &DailyRollup) -> StoreResult<()> {
        self.write_rollup(rollup).await
    }

    async fn compute_activity(&self, date: NaiveDate) -> StoreResult<DailyActivity> {
        self.compute_day_activity(date).await
    }

    async fn replace_activity(&self, activity: &DailyActivity) -> StoreResult<()> {
        self.write_day_activity(activity).await
    }

    async fn begin_run(&self, date: NaiveDate, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregation_runs (date, status, started_at, completed_at, venues, contents, failures)
            VALUES (?1, ?2, ?3, NULL, 0, 0, 0)
            ON CONFLICT(date) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = NULL
            "#,
        )
        .bind(date_key(date))
        .bind(RUN_RUNNING)
        .bind(to_millis(at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn complete_run(&self, run: &AggregationRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE aggregation_runs
            SET status = ?2, completed_at = ?3, venues = ?4, contents = ?5, failures = ?6
            WHERE date = ?1
            "#,
        )
        .bind(date_key(run.date))
        .bind(&run.status)
        .bind(run.completed_at.map(to_millis))
        .bind(run.venues)
        .bind(run.contents)
        .bind(run.failures)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        date: NaiveDate,
        entity: EntityRef,
        error: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregation_failures (date, entity_kind, entity_id, error, attempts, last_attempt)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            ON CONFLICT(date, entity_kind, entity_id) DO UPDATE SET
                error = excluded.error,
                attempts = attempts + 1,
                last_attempt = excluded.last_attempt
            "#,
        )
        .bind(date_key(date))
        .bind(entity.kind.as_str())
        .bind(entity.id)
        .bind(error)
        .bind(to_millis(at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn clear_failure(&self, date: NaiveDate, entity: EntityRef) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM aggregation_failures WHERE date = ?1 AND entity_kind = ?2 AND entity_id = ?3",
        )
        .bind(date_key(date))
        .bind(entity.kind.as_str())
        .bind(entity.id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn failed_entities(&self, date: NaiveDate) -> StoreResult<Vec<EntityRef>> {
        let rows = sqlx::query(
            "SELECT entity_kind, entity_id FROM aggregation_failures WHERE date = ?1 ORDER BY entity_kind DESC, entity_id",
        )
        .bind(date_key(date))
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<EntityRef> {
                let kind: String = row.try_get("entity_kind")?;
                entity_from_parts(&kind, row.try_get("entity_id")?)
            })
            .collect()
    }

    async fn failure_dates(&self) -> StoreResult<Vec<NaiveDate>> {
        let dates: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT date FROM aggregation_failures ORDER BY date")
                .fetch_all(self.pool())
                .await?;
        dates.iter().map(|d| parse_date_key(d)).collect()
    }

    async fn outstanding_failures(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aggregation_failures")
            .fetch_one(self.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn pending_dates(&self, window: StatWindow) -> StoreResult<Vec<NaiveDate>> {
        let (start, end) = window.bounds();
        let dates: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT day FROM (
                SELECT DISTINCT date(timestamp / 1000, 'unixepoch') AS day
                FROM events
                WHERE timestamp >= ?1 AND timestamp < ?2
            )
            WHERE day NOT IN (SELECT date FROM aggregation_runs WHERE status = ?3)
            ORDER BY day
            "#,
        )
        .bind(to_millis(start))
        .bind(to_millis(end))
        .bind(RUN_COMPLETED)
        .fetch_all(self.pool())
        .await?;
        dates.iter().map(|d| parse_date_key(d)).collect()
    }
}
