//! Real-time window engine.
//!
//! Every figure here is read straight from raw events and sessions over a
//! trailing window. Nothing is cached or pre-aggregated, and reads are not
//! coordinated with in-flight collector writes.

use std::sync::Arc;

use analytics_core::{
    limits::RECENT_SEARCHES_LIMIT, AnalyticsConfig, DailyStat, EntityCount, EntityKind, EntityRef,
    Result, TermCount,
};
use analytics_store::SqliteStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

const RECENT_SEARCH_WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeSnapshot {
    pub active_sessions: i64,
    pub recent_events: i64,
    pub trending_venues: Vec<EntityCount>,
    pub trending_content: Vec<EntityCount>,
    pub recent_searches: Vec<TermCount>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RealtimeEngine {
    store: SqliteStore,
    config: Arc<AnalyticsConfig>,
}

impl RealtimeEngine {
    pub fn new(store: SqliteStore, config: Arc<AnalyticsConfig>) -> Self {
        Self { store, config }
    }

    /// Sessions with activity inside the real-time window.
    pub async fn active_sessions(&self, now: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .store
            .count_active_sessions(now - self.config.realtime_window())
            .await?)
    }

    pub async fn recent_events(&self, now: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .store
            .count_events_since(now - self.config.recent_events_window())
            .await?)
    }

    /// Top entities by raw event count inside the real-time window.
    pub async fn trending(
        &self,
        kind: EntityKind,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<EntityCount>> {
        Ok(self
            .store
            .trending(kind, now - self.config.realtime_window(), limit)
            .await?)
    }

    pub async fn recent_searches(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<TermCount>> {
        let since = now - Duration::minutes(RECENT_SEARCH_WINDOW_MINUTES);
        // end is exclusive; include searches stamped exactly at `now`
        Ok(self
            .store
            .popular_searches(since, now + Duration::milliseconds(1), limit)
            .await?)
    }

    /// One entity's statistic for `date`, computed from raw events with the
    /// same function the aggregator persists.
    pub async fn live_day_stat(&self, entity: EntityRef, date: NaiveDate) -> Result<DailyStat> {
        Ok(self.store.compute_day_stat(entity, date).await?.stats)
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<RealtimeSnapshot> {
        let limit = self.config.trending_limit;
        Ok(RealtimeSnapshot {
            active_sessions: self.active_sessions(now).await?,
            recent_events: self.recent_events(now).await?,
            trending_venues: self.trending(EntityKind::Venue, now, limit).await?,
            trending_content: self.trending(EntityKind::Content, now, limit).await?,
            recent_searches: self.recent_searches(now, RECENT_SEARCHES_LIMIT).await?,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::{ClientInfo, Event, EventType, NewEvent};

    #[tokio::test]
    async fn test_snapshot_excludes_idle_sessions_and_breaks_ties_by_recency() {
        let store = SqliteStore::in_memory().await.unwrap();
        let engine = RealtimeEngine::new(store.clone(), Arc::new(AnalyticsConfig::default()));
        let now = Utc::now();
        let client = ClientInfo::default();
        let idle = Duration::minutes(30);

        let fresh = store
            .record_activity("fresh", &client, now - Duration::minutes(5), idle)
            .await
            .unwrap();
        store
            .record_activity("stale", &client, now - Duration::minutes(31), idle)
            .await
            .unwrap();

        // venues 1 and 2 tie on count; 2 was seen last
        for (venue, minutes_ago) in [(1, 10), (2, 2)] {
            let event = Event::new(
                NewEvent::new(EventType::VenueView).venue(venue),
                fresh.session_id,
                &client,
                now - Duration::minutes(minutes_ago),
            );
            store.write_event(&event).await.unwrap();
        }

        let snapshot = engine.snapshot(now).await.unwrap();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.recent_events, 2);
        let order: Vec<i64> = snapshot.trending_venues.iter().map(|c| c.entity_id).collect();
        assert_eq!(order, vec![2, 1]);
        assert!(snapshot.trending_content.is_empty());
    }
}
