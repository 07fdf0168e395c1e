//! Dashboard queries over arbitrary date ranges.
//!
//! Each date is read from exactly one source: stored rollups for dates
//! before today, a live raw-event computation for today. Partial same-day
//! figures are never written into or merged with the rollup tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use analytics_core::{
    limits::{
        CONTENT_DASHBOARD_DAYS, MAX_PERFORMANCE_HOURS, MAX_PERFORMANCE_SAMPLES,
        POPULAR_SEARCHES_LIMIT, TOP_CONTENT_LIMIT, TOP_VENUES_LIMIT,
    },
    DailyActivity, DailyStat, EntityCount, EntityKind, EntityRef, Error, MetricSummary,
    PerformanceSample, Result, StatWindow, TermCount,
};
use analytics_store::{GlobalTotals, SqliteStore};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use telemetry::metrics;
use tracing::debug;

use crate::catalog::Catalog;
use crate::services::realtime::RealtimeEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl From<StatWindow> for DateRange {
    fn from(window: StatWindow) -> Self {
        Self {
            start_date: window.start,
            end_date: window.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntity {
    pub id: i64,
    pub name: Option<String>,
    pub views: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayEntry {
    pub date: NaiveDate,
    /// Computed from raw events (today) rather than read from a rollup.
    pub live: bool,
    #[serde(flatten)]
    pub stats: DailyStat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalDashboard {
    pub global_stats: GlobalTotals,
    pub top_venues: Vec<RankedEntity>,
    pub popular_searches: Vec<TermCount>,
    pub daily_activity: Vec<DailyActivity>,
    pub range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDashboard {
    pub id: i64,
    pub name: Option<String>,
    /// Day-level sums; `unique_visitors` counts a visitor once per day.
    pub stats: DailyStat,
    pub daily_breakdown: Vec<DayEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_content: Option<Vec<RankedEntity>>,
    pub range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceDashboard {
    pub hours: u32,
    pub samples: Vec<PerformanceSample>,
    pub summaries: Vec<MetricSummary>,
}

#[derive(Clone)]
pub struct DashboardService {
    store: SqliteStore,
    realtime: RealtimeEngine,
    catalog: Option<Arc<dyn Catalog>>,
}

/// Adds `live` counts onto `historical` and returns the top `limit` by count,
/// ties to the lower id.
fn merge_counts(historical: Vec<EntityCount>, live: Vec<EntityCount>, limit: u32) -> Vec<(i64, i64)> {
    let mut totals: HashMap<i64, i64> = HashMap::new();
    for count in historical.into_iter().chain(live) {
        *totals.entry(count.entity_id).or_default() += count.count;
    }
    let mut ranked: Vec<(i64, i64)> = totals.into_iter().filter(|(_, views)| *views > 0).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(limit as usize);
    ranked
}

impl DashboardService {
    pub fn new(store: SqliteStore, realtime: RealtimeEngine, catalog: Option<Arc<dyn Catalog>>) -> Self {
        Self {
            store,
            realtime,
            catalog,
        }
    }

    async fn name_of(&self, entity: EntityRef) -> Option<String> {
        let catalog = self.catalog.as_ref()?;
        match catalog.lookup(entity).await {
            Ok(entry) => entry.and_then(|e| e.name),
            Err(e) => {
                debug!(%entity, error = %e, "Catalog name lookup failed");
                None
            }
        }
    }

    async fn ranked(&self, kind: EntityKind, counts: Vec<(i64, i64)>) -> Vec<RankedEntity> {
        let mut ranked = Vec::with_capacity(counts.len());
        for (id, views) in counts {
            ranked.push(RankedEntity {
                id,
                name: self.name_of(EntityRef { kind, id }).await,
                views,
            });
        }
        ranked
    }

    /// `GET /analytics/global?days=N`
    pub async fn global(&self, days: u32, today: NaiveDate) -> Result<GlobalDashboard> {
        let started = Instant::now();
        let window = StatWindow::trailing(days, today)?;
        let (start, end) = window.bounds();

        let mut global_stats = GlobalTotals::default();
        let mut daily_activity = Vec::new();
        let mut historical = Vec::new();
        if let Some(past) = window.before(today) {
            global_stats += self.store.rollup_global_totals(past).await?;
            daily_activity = self.store.activity_rollups(past).await?;
            historical = self.store.rollup_view_totals(EntityKind::Venue, past).await?;
        }

        let mut live = Vec::new();
        if window.contains(today) {
            global_stats += self.store.live_global_totals(today).await?;
            let activity = self.store.compute_day_activity(today).await?;
            if activity.events > 0 {
                daily_activity.push(activity);
            }
            live = self.store.live_view_counts(EntityKind::Venue, today).await?;
        }

        let top = merge_counts(historical, live, TOP_VENUES_LIMIT);
        let top_venues = self.ranked(EntityKind::Venue, top).await;

        let popular_searches = self
            .store
            .popular_searches(start, end, POPULAR_SEARCHES_LIMIT)
            .await?;

        metrics().query_latency_ms.observe_duration(started.elapsed());
        Ok(GlobalDashboard {
            global_stats,
            top_venues,
            popular_searches,
            daily_activity,
            range: window.into(),
        })
    }

    /// Per-day statistics for one entity; rollups before `today`, live for `today`.
    pub async fn daily_breakdown(
        &self,
        entity: EntityRef,
        window: StatWindow,
        today: NaiveDate,
    ) -> Result<Vec<DayEntry>> {
        let mut days = Vec::new();
        if let Some(past) = window.before(today) {
            for rollup in self.store.rollups_for(entity, past).await? {
                days.push(DayEntry {
                    date: rollup.date,
                    live: false,
                    stats: rollup.stats,
                });
            }
        }
        if window.contains(today) {
            let stats = self.realtime.live_day_stat(entity, today).await?;
            if !stats.is_empty() {
                days.push(DayEntry {
                    date: today,
                    live: true,
                    stats,
                });
            }
        }
        Ok(days)
    }

    async fn entity_dashboard(
        &self,
        entity: EntityRef,
        window: StatWindow,
        today: NaiveDate,
    ) -> Result<EntityDashboard> {
        let daily_breakdown = self.daily_breakdown(entity, window, today).await?;
        let mut stats = DailyStat::default();
        for day in &daily_breakdown {
            stats += day.stats;
        }
        Ok(EntityDashboard {
            id: entity.id,
            name: self.name_of(entity).await,
            stats,
            daily_breakdown,
            top_content: None,
            range: window.into(),
        })
    }

    /// `GET /analytics/venues/{id}?days=N`
    pub async fn venue(&self, venue_id: i64, days: u32, today: NaiveDate) -> Result<EntityDashboard> {
        let started = Instant::now();
        let window = StatWindow::trailing(days, today)?;
        let mut dashboard = self
            .entity_dashboard(EntityRef::venue(venue_id), window, today)
            .await?;

        let historical = match window.before(today) {
            Some(past) => self.store.venue_content_rollup_views(venue_id, past).await?,
            None => Vec::new(),
        };
        let live = if window.contains(today) {
            self.store.venue_content_live_views(venue_id, today).await?
        } else {
            Vec::new()
        };
        let top = merge_counts(historical, live, TOP_CONTENT_LIMIT);
        dashboard.top_content = Some(self.ranked(EntityKind::Content, top).await);

        metrics().query_latency_ms.observe_duration(started.elapsed());
        Ok(dashboard)
    }

    /// `GET /analytics/content/{id}`, always the trailing 30 days.
    pub async fn content(&self, content_id: i64, today: NaiveDate) -> Result<EntityDashboard> {
        let started = Instant::now();
        let window = StatWindow::trailing(CONTENT_DASHBOARD_DAYS, today)?;
        let dashboard = self
            .entity_dashboard(EntityRef::content(content_id), window, today)
            .await?;
        metrics().query_latency_ms.observe_duration(started.elapsed());
        Ok(dashboard)
    }

    /// `GET /analytics/performance?hours=N`
    pub async fn performance(&self, hours: u32, now: DateTime<Utc>) -> Result<PerformanceDashboard> {
        if hours == 0 || hours > MAX_PERFORMANCE_HOURS {
            return Err(Error::invalid_parameter(format!(
                "hours must be between 1 and {MAX_PERFORMANCE_HOURS}"
            )));
        }
        let since = now - Duration::hours(i64::from(hours));
        Ok(PerformanceDashboard {
            hours,
            samples: self
                .store
                .performance_samples(since, MAX_PERFORMANCE_SAMPLES)
                .await?,
            summaries: self.store.metric_summaries(since).await?,
        })
    }
}
