//! Size limits and bounds for the analytics pipeline.
//!
//! Public tracking endpoints accept input from anonymous clients, so every
//! free-text field is bounded. Oversized input is truncated rather than
//! rejected: analytics must never break the user action that triggered it.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so a few bounds are duplicated there. Keep both in sync when modifying.

// === Event Limits ===

/// Maximum serialized size of an event's property bag (4KB).
pub const MAX_PROPERTIES_BYTES: usize = 4 * 1024;

/// Key added to a property bag that had entries dropped to fit the cap.
pub const TRUNCATED_MARKER: &str = "_truncated";

// === String Field Limits (chars) ===

/// User agent string max length.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// IP address max length (IPv6 = 45 chars).
pub const MAX_IP_LEN: usize = 45;

/// Referrer URL max length.
pub const MAX_REFERRER_LEN: usize = 2048;

/// Session token max length.
pub const MAX_SESSION_TOKEN_LEN: usize = 128;

/// Search term max length.
pub const MAX_SEARCH_TERM_LEN: usize = 200;

/// Search type max length (venue, neighborhood, content).
pub const MAX_SEARCH_TYPE_LEN: usize = 32;

/// Share platform max length.
pub const MAX_PLATFORM_LEN: usize = 64;

/// Performance metric name max length.
pub const MAX_METRIC_NAME_LEN: usize = 128;

/// Admin bearer token format (opaque or JWT, URL safe alphabet).
pub const ADMIN_TOKEN_PATTERN: &str = r"^[A-Za-z0-9._~+/=-]{16,4096}$";

// === Query Bounds ===

/// Largest `days` accepted by dashboard queries.
pub const MAX_DASHBOARD_DAYS: u32 = 365;

/// Trailing window of the content dashboard.
pub const CONTENT_DASHBOARD_DAYS: u32 = 30;

/// Largest `hours` accepted by the performance dashboard (30 days).
pub const MAX_PERFORMANCE_HOURS: u32 = 30 * 24;

/// Raw samples returned by the performance dashboard.
pub const MAX_PERFORMANCE_SAMPLES: u32 = 1000;

/// Largest audit log page.
pub const MAX_AUDIT_LIMIT: u32 = 1000;

/// Default hard cap on exported rows.
pub const DEFAULT_MAX_EXPORT_ROWS: u64 = 50_000;

// === Ranking Sizes ===

pub const TOP_VENUES_LIMIT: u32 = 10;
pub const TOP_CONTENT_LIMIT: u32 = 10;
pub const POPULAR_SEARCHES_LIMIT: u32 = 20;
pub const RECENT_SEARCHES_LIMIT: u32 = 10;

/// Truncates a string to at most `max_chars` characters.
pub fn clamp_str(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Truncates an optional string, mapping blank values to `None`.
pub fn clamp_opt(value: Option<&str>, max_chars: usize) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| clamp_str(v, max_chars))
}
