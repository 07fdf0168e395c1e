//! Analytics behavior configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limits::DEFAULT_MAX_EXPORT_ROWS;
use crate::retention::{RetentionPolicy, DEFAULT_RETENTION_DAYS};
use crate::session::DEFAULT_IDLE_MINUTES;

/// What to do with events that reference entities unknown to the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferentialPolicy {
    /// Store and aggregate regardless of catalog state.
    #[default]
    Accept,
    /// Reject with a validation error before any write.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: i64,

    /// Upper bound on the collector's storage write.
    #[serde(default = "default_collector_timeout_ms")]
    pub collector_timeout_ms: u64,

    #[serde(default = "default_max_export_rows")]
    pub max_export_rows: u64,

    /// Trailing window for active sessions and trending entities.
    #[serde(default = "default_realtime_window_minutes")]
    pub realtime_window_minutes: i64,

    #[serde(default = "default_recent_events_minutes")]
    pub recent_events_minutes: i64,

    #[serde(default = "default_trending_limit")]
    pub trending_limit: u32,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default)]
    pub referential_policy: ReferentialPolicy,
}

fn default_session_idle_minutes() -> i64 {
    DEFAULT_IDLE_MINUTES
}

fn default_collector_timeout_ms() -> u64 {
    250
}

fn default_max_export_rows() -> u64 {
    DEFAULT_MAX_EXPORT_ROWS
}

fn default_realtime_window_minutes() -> i64 {
    30
}

fn default_recent_events_minutes() -> i64 {
    60
}

fn default_trending_limit() -> u32 {
    5
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            session_idle_minutes: default_session_idle_minutes(),
            collector_timeout_ms: default_collector_timeout_ms(),
            max_export_rows: default_max_export_rows(),
            realtime_window_minutes: default_realtime_window_minutes(),
            recent_events_minutes: default_recent_events_minutes(),
            trending_limit: default_trending_limit(),
            retention_days: default_retention_days(),
            referential_policy: ReferentialPolicy::default(),
        }
    }
}

impl AnalyticsConfig {
    pub fn session_idle(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_idle_minutes)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector_timeout_ms)
    }

    pub fn realtime_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.realtime_window_minutes)
    }

    pub fn recent_events_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recent_events_minutes)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from_days(self.retention_days)
    }
}
