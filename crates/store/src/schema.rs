//! Database schema.
//!
//! Timestamps are UTC milliseconds since epoch. Rollup and bookkeeping
//! dates are `YYYY-MM-DD` text.

use tracing::debug;

use crate::client::SqliteStore;
use crate::error::StoreResult;

/// Raw events. Immutable once written.
pub const EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    venue_id INTEGER,
    content_id INTEGER,
    session_id TEXT NOT NULL,
    ip TEXT,
    user_agent TEXT,
    referrer TEXT,
    properties TEXT NOT NULL DEFAULT '{}',
    timestamp INTEGER NOT NULL
)
"#;

/// Sessions. At most one open row per token.
pub const SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    session_token TEXT NOT NULL,
    ip TEXT,
    user_agent TEXT,
    referrer TEXT,
    start_time INTEGER NOT NULL,
    last_activity INTEGER NOT NULL,
    page_view_count INTEGER NOT NULL DEFAULT 1,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
)
"#;

pub const DAILY_VENUE_STATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daily_venue_stats (
    venue_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    views INTEGER NOT NULL DEFAULT 0,
    unique_visitors INTEGER NOT NULL DEFAULT 0,
    content_views INTEGER NOT NULL DEFAULT 0,
    shares INTEGER NOT NULL DEFAULT 0,
    favorites INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (venue_id, date)
)
"#;

pub const DAILY_CONTENT_STATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daily_content_stats (
    content_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    venue_id INTEGER,
    views INTEGER NOT NULL DEFAULT 0,
    unique_visitors INTEGER NOT NULL DEFAULT 0,
    content_views INTEGER NOT NULL DEFAULT 0,
    shares INTEGER NOT NULL DEFAULT 0,
    favorites INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (content_id, date)
)
"#;

/// Visitors and event count across all entities, one row per closed day.
pub const DAILY_ACTIVITY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daily_activity (
    date TEXT PRIMARY KEY,
    unique_visitors INTEGER NOT NULL DEFAULT 0,
    events INTEGER NOT NULL DEFAULT 0
)
"#;

pub const SEARCH_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS search_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    search_term TEXT NOT NULL,
    search_type TEXT,
    results_count INTEGER,
    timestamp INTEGER NOT NULL
)
"#;

pub const PERFORMANCE_SAMPLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS performance_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL,
    metadata TEXT,
    timestamp INTEGER NOT NULL
)
"#;

pub const AUDIT_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    target TEXT,
    details TEXT NOT NULL DEFAULT 'null',
    ip TEXT,
    outcome TEXT NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

pub const AGGREGATION_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS aggregation_runs (
    date TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    venues INTEGER NOT NULL DEFAULT 0,
    contents INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0
)
"#;

pub const AGGREGATION_FAILURES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS aggregation_failures (
    date TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    error TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 1,
    last_attempt INTEGER NOT NULL,
    PRIMARY KEY (date, entity_kind, entity_id)
)
"#;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_venue ON events(venue_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_content ON events(content_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type, timestamp)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_open_token ON sessions(session_token) WHERE active = 1",
    "CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions(active, last_activity)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time)",
    "CREATE INDEX IF NOT EXISTS idx_daily_venue_stats_date ON daily_venue_stats(date)",
    "CREATE INDEX IF NOT EXISTS idx_daily_content_stats_date ON daily_content_stats(date)",
    "CREATE INDEX IF NOT EXISTS idx_daily_content_stats_venue ON daily_content_stats(venue_id, date)",
    "CREATE INDEX IF NOT EXISTS idx_search_records_timestamp ON search_records(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_performance_samples_timestamp ON performance_samples(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_audit_log_created ON audit_log(created_at)",
];

/// All table DDL statements, in creation order.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        EVENTS_TABLE,
        SESSIONS_TABLE,
        DAILY_VENUE_STATS_TABLE,
        DAILY_CONTENT_STATS_TABLE,
        DAILY_ACTIVITY_TABLE,
        SEARCH_RECORDS_TABLE,
        PERFORMANCE_SAMPLES_TABLE,
        AUDIT_LOG_TABLE,
        AGGREGATION_RUNS_TABLE,
        AGGREGATION_FAILURES_TABLE,
    ]
}

/// Creates tables and indexes if they do not exist.
pub async fn init_schema(store: &SqliteStore) -> StoreResult<()> {
    for ddl in all_tables().into_iter().chain(INDEXES.iter().copied()) {
        sqlx::query(ddl).execute(store.pool()).await?;
    }
    debug!("SQLite schema initialized");
    Ok(())
}
