//! Mock implementations for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use analytics_core::{
    ClientInfo, Error, Event, PerformanceSample, Result, SearchRecord, SessionTouch,
};
use analytics_store::{AnalyticsWriter, SqliteStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Writer that delegates to a real store but can be told to fail or stall.
///
/// Implements the same `AnalyticsWriter` trait as the store, so the
/// collector's drop policy is exercised through production code paths.
#[derive(Clone)]
pub struct MockWriter {
    inner: SqliteStore,
    should_fail: Arc<Mutex<bool>>,
    delay: Arc<Mutex<Option<Duration>>>,
    event_attempts: Arc<AtomicUsize>,
}

impl MockWriter {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            should_fail: Arc::new(Mutex::new(false)),
            delay: Arc::new(Mutex::new(None)),
            event_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set failure mode for testing the storage-unavailable path.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    /// Delays every write, to push the collector past its timeout.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Event inserts attempted, including failed ones.
    pub fn event_attempts(&self) -> usize {
        self.event_attempts.load(Ordering::Relaxed)
    }

    async fn gate(&self) -> Result<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.should_fail.lock() {
            return Err(Error::storage("Mock writer failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsWriter for MockWriter {
    async fn touch_session(
        &self,
        token: &str,
        client: &ClientInfo,
        at: DateTime<Utc>,
        idle: chrono::Duration,
    ) -> Result<SessionTouch> {
        self.gate().await?;
        self.inner.touch_session(token, client, at, idle).await
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        self.event_attempts.fetch_add(1, Ordering::Relaxed);
        self.gate().await?;
        self.inner.insert_event(event).await
    }

    async fn insert_search(&self, search: &SearchRecord) -> Result<()> {
        self.gate().await?;
        self.inner.insert_search(search).await
    }

    async fn insert_sample(&self, sample: &PerformanceSample) -> Result<()> {
        self.gate().await?;
        self.inner.insert_sample(sample).await
    }

    async fn close_idle_sessions(&self, now: DateTime<Utc>, idle: chrono::Duration) -> Result<u64> {
        self.gate().await?;
        self.inner.close_idle_sessions(now, idle).await
    }

    fn is_healthy(&self) -> bool {
        !*self.should_fail.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::{EventType, NewEvent};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_mock_writer_failure_mode() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mock = MockWriter::new(store);
        mock.set_should_fail(true);

        let event = Event::new(
            NewEvent::new(EventType::Click),
            Uuid::new_v4(),
            &ClientInfo::default(),
            Utc::now(),
        );
        assert!(mock.insert_event(&event).await.is_err());
        assert_eq!(mock.event_attempts(), 1);
        assert!(!mock.is_healthy());

        mock.set_should_fail(false);
        assert!(mock.insert_event(&event).await.is_ok());
    }
}
