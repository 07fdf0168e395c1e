//! Session lifecycle.
//!
//! Whether a session is still open is decided at read time from its last
//! activity. The sweep only materializes `active = 0` to keep the open-token
//! index small.

use std::sync::Arc;

use analytics_core::{ClientInfo, Result, Session, SessionState, SessionToken, SessionTouch};
use analytics_store::AnalyticsWriter;
use chrono::{DateTime, Duration, Utc};

#[derive(Clone)]
pub struct SessionTracker {
    writer: Arc<dyn AnalyticsWriter>,
    idle: Duration,
}

impl SessionTracker {
    pub fn new(writer: Arc<dyn AnalyticsWriter>, idle: Duration) -> Self {
        Self { writer, idle }
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle
    }

    /// Opens or extends the session behind `token`.
    pub async fn touch(
        &self,
        token: &SessionToken,
        client: &ClientInfo,
        at: DateTime<Utc>,
    ) -> Result<SessionTouch> {
        self.writer
            .touch_session(token.as_str(), client, at, self.idle)
            .await
    }

    pub fn state_of(&self, session: &Session, now: DateTime<Utc>) -> SessionState {
        session.state_at(now, self.idle)
    }

    pub fn is_active(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.is_active_at(now, self.idle)
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        self.writer.close_idle_sessions(now, self.idle).await
    }
}
