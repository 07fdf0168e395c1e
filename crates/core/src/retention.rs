//! Retention policy definitions.
//!
//! Rollups and the audit log are durable and never purged here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default retention for raw events, sessions and searches.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Performance samples are only useful for recent monitoring.
pub const DEFAULT_PERFORMANCE_RETENTION_DAYS: u32 = 30;

/// Retention windows per raw table, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub events_days: u32,
    pub sessions_days: u32,
    pub searches_days: u32,
    pub performance_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_days(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    /// Uses `days` for every raw table, capping performance samples.
    pub fn from_days(days: u32) -> Self {
        Self {
            events_days: days,
            sessions_days: days,
            searches_days: days,
            performance_days: days.min(DEFAULT_PERFORMANCE_RETENTION_DAYS),
        }
    }

    pub fn cutoffs(&self, now: DateTime<Utc>) -> RetentionCutoffs {
        let before = |days: u32| now - Duration::days(i64::from(days));
        RetentionCutoffs {
            events: before(self.events_days),
            sessions: before(self.sessions_days),
            searches: before(self.searches_days),
            performance: before(self.performance_days),
        }
    }
}

/// Rows strictly older than these instants are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionCutoffs {
    pub events: DateTime<Utc>,
    pub sessions: DateTime<Utc>,
    pub searches: DateTime<Utc>,
    pub performance: DateTime<Utc>,
}

/// Number of rows deleted per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub events: u64,
    pub sessions: u64,
    pub searches: u64,
    pub performance_samples: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.events + self.sessions + self.searches + self.performance_samples
    }
}
