//! Write path used by the collector and the sampling middleware.

use analytics_core::{
    to_millis, ClientInfo, Event, PerformanceSample, Result, SearchRecord, SessionTouch,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::client::SqliteStore;
use crate::error::StoreResult;

/// Storage operations on the public write path.
///
/// Implemented by [`SqliteStore`]; tests substitute failing or slow writers
/// to exercise the collector's drop policy.
#[async_trait]
pub trait AnalyticsWriter: Send + Sync {
    /// Records activity for a session token, opening a new session when the
    /// token has none or its last one went idle.
    async fn touch_session(
        &self,
        token: &str,
        client: &ClientInfo,
        at: DateTime<Utc>,
        idle: Duration,
    ) -> Result<SessionTouch>;

    async fn insert_event(&self, event: &Event) -> Result<()>;

    async fn insert_search(&self, search: &SearchRecord) -> Result<()>;

    async fn insert_sample(&self, sample: &PerformanceSample) -> Result<()>;

    /// Marks sessions idle longer than `idle` as closed. Returns how many.
    async fn close_idle_sessions(&self, now: DateTime<Utc>, idle: Duration) -> Result<u64>;

    fn is_healthy(&self) -> bool {
        true
    }
}

impl SqliteStore {
    pub async fn write_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, event_type, venue_id, content_id, session_id, ip, user_agent, referrer, properties, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.event_type.as_str())
        .bind(event.venue_id)
        .bind(event.content_id)
        .bind(event.session_id.to_string())
        .bind(event.ip.as_deref())
        .bind(event.user_agent.as_deref())
        .bind(event.referrer.as_deref())
        .bind(event.properties.to_json_string())
        .bind(to_millis(event.timestamp))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn write_search(&self, search: &SearchRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO search_records (search_term, search_type, results_count, timestamp) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&search.search_term)
        .bind(search.search_type.as_deref())
        .bind(search.results_count)
        .bind(to_millis(search.timestamp))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn write_sample(&self, sample: &PerformanceSample) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO performance_samples (metric_name, value, metadata, timestamp) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&sample.metric_name)
        .bind(sample.value)
        .bind(sample.metadata.as_ref().map(|m| m.to_string()))
        .bind(to_millis(sample.timestamp))
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AnalyticsWriter for SqliteStore {
    async fn touch_session(
        &self,
        token: &str,
        client: &ClientInfo,
        at: DateTime<Utc>,
        idle: Duration,
    ) -> Result<SessionTouch> {
        Ok(self.record_activity(token, client, at, idle).await?)
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        Ok(self.write_event(event).await?)
    }

    async fn insert_search(&self, search: &SearchRecord) -> Result<()> {
        Ok(self.write_search(search).await?)
    }

    async fn insert_sample(&self, sample: &PerformanceSample) -> Result<()> {
        Ok(self.write_sample(sample).await?)
    }

    async fn close_idle_sessions(&self, now: DateTime<Utc>, idle: Duration) -> Result<u64> {
        Ok(self.sweep_expired_sessions(now, idle).await?)
    }

    fn is_healthy(&self) -> bool {
        !self.pool().is_closed()
    }
}
