//! Session handling types.
//!
//! Session state is derived at read time from `last_activity`. The stored
//! `active` flag is only an index hint materialized by the optional sweep.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::limits::MAX_SESSION_TOKEN_LEN;

/// Default inactivity threshold (30 minutes).
pub const DEFAULT_IDLE_MINUTES: i64 = 30;

/// Read-time session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Exactly one event seen so far.
    New,
    Active,
    /// Idle threshold exceeded; the session is ended and its duration fixed.
    Expired,
}

/// A pseudonymous client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub session_token: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub page_view_count: i64,
    pub duration_ms: i64,
    /// Materialized hint; use [`Session::is_active_at`] for the truth.
    pub active: bool,
}

impl Session {
    /// Returns the session duration (`last_activity - start_time`).
    pub fn duration(&self) -> Duration {
        self.last_activity - self.start_time
    }

    /// Whether the session is still open at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>, idle: Duration) -> bool {
        self.active && now - self.last_activity <= idle
    }

    pub fn state_at(&self, now: DateTime<Utc>, idle: Duration) -> SessionState {
        if !self.is_active_at(now, idle) {
            SessionState::Expired
        } else if self.page_view_count <= 1 {
            SessionState::New
        } else {
            SessionState::Active
        }
    }
}

/// Client supplied session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Accepts a client token if it is non-empty, bounded and URL safe.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_TOKEN_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    /// Mints a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uses the client token when acceptable, otherwise mints a new one.
    pub fn parse_or_generate(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of recording activity against a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTouch {
    pub session_id: Uuid,
    /// True when this touch opened a new session.
    pub is_new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(last_minutes_ago: i64, views: i64, now: DateTime<Utc>) -> Session {
        let start = now - Duration::minutes(last_minutes_ago + 5);
        let last = now - Duration::minutes(last_minutes_ago);
        Session {
            id: Uuid::new_v4(),
            session_token: "tok".into(),
            ip: None,
            user_agent: None,
            referrer: None,
            start_time: start,
            last_activity: last,
            page_view_count: views,
            duration_ms: (last - start).num_milliseconds(),
            active: true,
        }
    }

    #[test]
    fn test_idle_threshold_boundary() {
        let now = Utc::now();
        let idle = Duration::minutes(DEFAULT_IDLE_MINUTES);

        assert!(session(30, 3, now).is_active_at(now, idle));
        assert!(!session(31, 3, now).is_active_at(now, idle));
        assert_eq!(session(31, 3, now).state_at(now, idle), SessionState::Expired);
    }

    #[test]
    fn test_state_new_then_active() {
        let now = Utc::now();
        let idle = Duration::minutes(DEFAULT_IDLE_MINUTES);
        assert_eq!(session(0, 1, now).state_at(now, idle), SessionState::New);
        assert_eq!(session(0, 2, now).state_at(now, idle), SessionState::Active);
    }

    #[test]
    fn test_duration_matches_bounds() {
        let now = Utc::now();
        let s = session(10, 4, now);
        assert_eq!(s.duration().num_milliseconds(), s.duration_ms);
    }

    #[test]
    fn test_token_parsing() {
        assert!(SessionToken::parse("abc-123_DEF").is_some());
        assert!(SessionToken::parse("   ").is_none());
        assert!(SessionToken::parse("has space").is_none());
        assert!(SessionToken::parse(&"a".repeat(MAX_SESSION_TOKEN_LEN + 1)).is_none());

        let minted = SessionToken::parse_or_generate(Some("bad token!"));
        assert!(Uuid::parse_str(minted.as_str()).is_ok());
    }
}
