//! Read queries for dashboards and the real-time window.
//!
//! Raw-event queries take explicit instants; rollup queries take date
//! windows. Callers decide which side of the day boundary to read.

use std::ops::AddAssign;

use analytics_core::{
    from_millis, to_millis, EntityCount, EntityKind, MetricSummary, PerformanceSample, StatWindow,
    TermCount,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::client::SqliteStore;
use crate::error::StoreResult;
use crate::rollup::date_key;

/// Visitor and view totals. `unique_visitors` counts a visitor once per day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTotals {
    pub unique_visitors: i64,
    pub total_events: i64,
    pub venue_views: i64,
    pub content_views: i64,
}

impl AddAssign for GlobalTotals {
    fn add_assign(&mut self, other: Self) {
        self.unique_visitors += other.unique_visitors;
        self.total_events += other.total_events;
        self.venue_views += other.venue_views;
        self.content_views += other.content_views;
    }
}

fn global_totals(row: &sqlx::sqlite::SqliteRow) -> StoreResult<GlobalTotals> {
    Ok(GlobalTotals {
        unique_visitors: row.try_get("unique_visitors")?,
        total_events: row.try_get("total_events")?,
        venue_views: row.try_get("venue_views")?,
        content_views: row.try_get("content_views")?,
    })
}

fn entity_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Venue => "venue_id",
        EntityKind::Content => "content_id",
    }
}

/// Event type counted as a "view" of the entity.
fn view_type(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Venue => "venue_view",
        EntityKind::Content => "content_view",
    }
}

fn entity_counts(rows: Vec<sqlx::sqlite::SqliteRow>) -> StoreResult<Vec<EntityCount>> {
    rows.iter()
        .map(|row| -> StoreResult<EntityCount> {
            let last_seen: Option<i64> = row.try_get("last_seen")?;
            Ok(EntityCount {
                entity_id: row.try_get("entity_id")?,
                count: row.try_get("count")?,
                last_seen: last_seen.map(from_millis),
            })
        })
        .collect()
}

impl SqliteStore {
    /// Totals summed from the stored rollups of the closed days in `window`.
    pub async fn rollup_global_totals(&self, window: StatWindow) -> StoreResult<GlobalTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(SUM(unique_visitors), 0) FROM daily_activity
                    WHERE date >= ?1 AND date <= ?2) AS unique_visitors,
                (SELECT COALESCE(SUM(events), 0) FROM daily_activity
                    WHERE date >= ?1 AND date <= ?2) AS total_events,
                (SELECT COALESCE(SUM(views), 0) FROM daily_venue_stats
                    WHERE date >= ?1 AND date <= ?2) AS venue_views,
                (SELECT COALESCE(SUM(content_views), 0) FROM daily_content_stats
                    WHERE date >= ?1 AND date <= ?2) AS content_views
            "#,
        )
        .bind(date_key(window.start))
        .bind(date_key(window.end))
        .fetch_one(self.pool())
        .await?;
        global_totals(&row)
    }

    /// Totals for `date` computed from raw events, counted the way the
    /// aggregator counts them.
    pub async fn live_global_totals(&self, date: NaiveDate) -> StoreResult<GlobalTotals> {
        let (start, end) = StatWindow::single(date).bounds();
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(DISTINCT session_id) AS unique_visitors,
                COUNT(*) AS total_events,
                COALESCE(SUM(CASE WHEN event_type = 'venue_view' AND venue_id IS NOT NULL
                    THEN 1 ELSE 0 END), 0) AS venue_views,
                COALESCE(SUM(CASE WHEN event_type IN ('content_view', 'story_view') AND content_id IS NOT NULL
                    THEN 1 ELSE 0 END), 0) AS content_views
            FROM events
            WHERE timestamp >= ?1 AND timestamp < ?2
            "#,
        )
        .bind(to_millis(start))
        .bind(to_millis(end))
        .fetch_one(self.pool())
        .await?;
        global_totals(&row)
    }

    /// Most frequent search terms in `[start, end)`.
    pub async fn popular_searches(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<TermCount>> {
        let rows = sqlx::query(
            r#"
            SELECT search_term, COUNT(*) AS frequency
            FROM search_records
            WHERE timestamp >= ?1 AND timestamp < ?2
            GROUP BY search_term
            ORDER BY frequency DESC, MAX(timestamp) DESC, search_term
            LIMIT ?3
            "#,
        )
        .bind(to_millis(start))
        .bind(to_millis(end))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<TermCount> {
                Ok(TermCount {
                    search_term: row.try_get("search_term")?,
                    frequency: row.try_get("frequency")?,
                })
            })
            .collect()
    }

    /// Summed rollup views per entity over a window of closed days.
    pub async fn rollup_view_totals(
        &self,
        kind: EntityKind,
        window: StatWindow,
    ) -> StoreResult<Vec<EntityCount>> {
        let sql = match kind {
            EntityKind::Venue => {
                r#"
                SELECT venue_id AS entity_id, SUM(views) AS count, NULL AS last_seen
                FROM daily_venue_stats
                WHERE date >= ?1 AND date <= ?2
                GROUP BY venue_id
                "#
            }
            EntityKind::Content => {
                r#"
                SELECT content_id AS entity_id, SUM(views) AS count, NULL AS last_seen
                FROM daily_content_stats
                WHERE date >= ?1 AND date <= ?2
                GROUP BY content_id
                "#
            }
        };
        let rows = sqlx::query(sql)
            .bind(date_key(window.start))
            .bind(date_key(window.end))
            .fetch_all(self.pool())
            .await?;
        entity_counts(rows)
    }

    /// Raw view counts per entity for one day.
    pub async fn live_view_counts(
        &self,
        kind: EntityKind,
        date: NaiveDate,
    ) -> StoreResult<Vec<EntityCount>> {
        let (start, end) = StatWindow::single(date).bounds();
        let column = entity_column(kind);
        let sql = format!(
            r#"
            SELECT {column} AS entity_id, COUNT(*) AS count, MAX(timestamp) AS last_seen
            FROM events
            WHERE {column} IS NOT NULL AND event_type = ?1 AND timestamp >= ?2 AND timestamp < ?3
            GROUP BY {column}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(view_type(kind))
            .bind(to_millis(start))
            .bind(to_millis(end))
            .fetch_all(self.pool())
            .await?;
        entity_counts(rows)
    }

    /// Summed rollup views of a venue's content over closed days.
    pub async fn venue_content_rollup_views(
        &self,
        venue_id: i64,
        window: StatWindow,
    ) -> StoreResult<Vec<EntityCount>> {
        let rows = sqlx::query(
            r#"
            SELECT content_id AS entity_id, SUM(views) AS count, NULL AS last_seen
            FROM daily_content_stats
            WHERE venue_id = ?1 AND date >= ?2 AND date <= ?3
            GROUP BY content_id
            "#,
        )
        .bind(venue_id)
        .bind(date_key(window.start))
        .bind(date_key(window.end))
        .fetch_all(self.pool())
        .await?;
        entity_counts(rows)
    }

    /// Raw content views carrying `venue_id` on one day.
    pub async fn venue_content_live_views(
        &self,
        venue_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<EntityCount>> {
        let (start, end) = StatWindow::single(date).bounds();
        let rows = sqlx::query(
            r#"
            SELECT content_id AS entity_id, COUNT(*) AS count, MAX(timestamp) AS last_seen
            FROM events
            WHERE venue_id = ?1 AND content_id IS NOT NULL AND event_type = 'content_view'
                AND timestamp >= ?2 AND timestamp < ?3
            GROUP BY content_id
            "#,
        )
        .bind(venue_id)
        .bind(to_millis(start))
        .bind(to_millis(end))
        .fetch_all(self.pool())
        .await?;
        entity_counts(rows)
    }

    // === Real-time window ===

    pub async fn count_events_since(&self, since: DateTime<Utc>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE timestamp >= ?1")
            .bind(to_millis(since))
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Entities with the most events since `since`.
    ///
    /// Ties go to the entity seen most recently, then the lower id.
    pub async fn trending(
        &self,
        kind: EntityKind,
        since: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<EntityCount>> {
        let column = entity_column(kind);
        let sql = format!(
            r#"
            SELECT {column} AS entity_id, COUNT(*) AS count, MAX(timestamp) AS last_seen
            FROM events
            WHERE {column} IS NOT NULL AND timestamp >= ?1
            GROUP BY {column}
            ORDER BY count DESC, last_seen DESC, entity_id
            LIMIT ?2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(to_millis(since))
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        entity_counts(rows)
    }

    /// Samples since `since`, newest first.
    pub async fn performance_samples(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<PerformanceSample>> {
        let rows = sqlx::query(
            r#"
            SELECT metric_name, value, metadata, timestamp
            FROM performance_samples
            WHERE timestamp >= ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(to_millis(since))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<PerformanceSample> {
                let metadata: Option<String> = row.try_get("metadata")?;
                Ok(PerformanceSample {
                    metric_name: row.try_get("metric_name")?,
                    value: row.try_get("value")?,
                    metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                    timestamp: from_millis(row.try_get("timestamp")?),
                })
            })
            .collect()
    }

    pub async fn metric_summaries(&self, since: DateTime<Utc>) -> StoreResult<Vec<MetricSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT metric_name, COUNT(*) AS count, AVG(value) AS avg, MAX(value) AS max
            FROM performance_samples
            WHERE timestamp >= ?1
            GROUP BY metric_name
            ORDER BY metric_name
            "#,
        )
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<MetricSummary> {
                Ok(MetricSummary {
                    metric_name: row.try_get("metric_name")?,
                    count: row.try_get("count")?,
                    avg: row.try_get("avg")?,
                    max: row.try_get("max")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::{
        ClientInfo, DailyActivity, EntityRef, Event, EventType, NewEvent, SearchRecord,
    };
    use chrono::Duration;
    use uuid::Uuid;

    async fn insert(store: &SqliteStore, new: NewEvent, session: Uuid, ts: DateTime<Utc>) {
        let event = Event::new(new, session, &ClientInfo::default(), ts);
        store.write_event(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_live_global_totals_cover_one_day() {
        let store = SqliteStore::in_memory().await.unwrap();
        let today = Utc::now().date_naive();
        let (start, _) = StatWindow::single(today).bounds();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();

        insert(&store, NewEvent::new(EventType::VenueView).venue(1), s1, start).await;
        insert(&store, NewEvent::new(EventType::ContentView).content(2), s2, start).await;
        insert(&store, NewEvent::new(EventType::Click), s2, start).await;
        // the previous day is not part of today's figures
        insert(&store, NewEvent::new(EventType::VenueView).venue(1), s1, start - Duration::minutes(1)).await;

        let totals = store.live_global_totals(today).await.unwrap();
        assert_eq!(
            totals,
            GlobalTotals {
                unique_visitors: 2,
                total_events: 3,
                venue_views: 1,
                content_views: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_rollup_global_totals_ignore_raw_events() {
        let store = SqliteStore::in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let (start, _) = StatWindow::single(day).bounds();
        insert(&store, NewEvent::new(EventType::VenueView).venue(1), Uuid::new_v4(), start).await;

        let mut venue = store.compute_day_stat(EntityRef::venue(1), day).await.unwrap();
        venue.stats.views = 10;
        store.write_rollup(&venue).await.unwrap();
        store
            .write_day_activity(&DailyActivity {
                date: day,
                unique_visitors: 4,
                events: 12,
            })
            .await
            .unwrap();

        let window = StatWindow::new(day - Duration::days(6), day).unwrap();
        let totals = store.rollup_global_totals(window).await.unwrap();
        assert_eq!(
            totals,
            GlobalTotals {
                unique_visitors: 4,
                total_events: 12,
                venue_views: 10,
                content_views: 0,
            }
        );

        let mut sum = totals;
        sum += store.live_global_totals(day).await.unwrap();
        assert_eq!(sum.venue_views, 11);
        assert_eq!(sum.total_events, 13);
    }

    #[tokio::test]
    async fn test_popular_searches_counts_terms() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        for term in ["rooftop", "rooftop", "rooftop", "jazz"] {
            let rec = SearchRecord::new(term, None, Some(1), now).unwrap();
            store.write_search(&rec).await.unwrap();
        }

        let top = store
            .popular_searches(now - Duration::hours(1), now + Duration::seconds(1), 20)
            .await
            .unwrap();
        assert_eq!(top[0].search_term, "rooftop");
        assert_eq!(top[0].frequency, 3);
        assert_eq!(top[1].search_term, "jazz");
    }

    #[tokio::test]
    async fn test_trending_tie_break_by_recency() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let s = Uuid::new_v4();

        // venue 1 and 2 tie on count; venue 2 was seen last
        insert(&store, NewEvent::new(EventType::VenueView).venue(1), s, now - Duration::minutes(10)).await;
        insert(&store, NewEvent::new(EventType::VenueView).venue(2), s, now - Duration::minutes(5)).await;
        insert(&store, NewEvent::new(EventType::VenueView).venue(3), s, now - Duration::minutes(9)).await;
        insert(&store, NewEvent::new(EventType::Share).venue(3), s, now - Duration::minutes(8)).await;
        // outside the window
        insert(&store, NewEvent::new(EventType::VenueView).venue(1), s, now - Duration::minutes(45)).await;

        let trending = store
            .trending(EntityKind::Venue, now - Duration::minutes(30), 5)
            .await
            .unwrap();
        let ids: Vec<i64> = trending.iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(trending[0].count, 2);
    }

    #[tokio::test]
    async fn test_performance_samples_and_summary() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        for (i, v) in [0.1, 0.3, 0.2].into_iter().enumerate() {
            let sample = PerformanceSample::new("response_time", v, now - Duration::seconds(i as i64));
            store.write_sample(&sample).await.unwrap();
        }
        let old = PerformanceSample::new("response_time", 9.0, now - Duration::hours(3));
        store.write_sample(&old).await.unwrap();

        let since = now - Duration::hours(1);
        let samples = store.performance_samples(since, 1000).await.unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[0].value - 0.1).abs() < f64::EPSILON);

        let summary = store.metric_summaries(since).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 3);
        assert!((summary[0].max - 0.3).abs() < 1e-9);
        assert!((summary[0].avg - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_view_counts_for_day() {
        let store = SqliteStore::in_memory().await.unwrap();
        let today = Utc::now().date_naive();
        let (start, _) = StatWindow::single(today).bounds();
        let s = Uuid::new_v4();

        insert(&store, NewEvent::new(EventType::VenueView).venue(4), s, start).await;
        insert(&store, NewEvent::new(EventType::VenueView).venue(4), s, start).await;
        insert(&store, NewEvent::new(EventType::Share).venue(4), s, start).await;
        insert(&store, NewEvent::new(EventType::ContentView).venue(4).content(8), s, start).await;

        let venues = store.live_view_counts(EntityKind::Venue, today).await.unwrap();
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].count, 2);

        let content = store.venue_content_live_views(4, today).await.unwrap();
        assert_eq!(content[0].entity_id, 8);
        assert_eq!(content[0].count, 1);
    }
}
