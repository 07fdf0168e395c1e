//! Token bucket rate limiting keyed by client IP.
//!
//! Buckets refill continuously at `capacity / window` tokens per second, so
//! a client that exhausts its budget regains one request at a time rather
//! than all at once when a fixed window resets.

use analytics_core::RateLimitErrorCode;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::debug;

use crate::extractors::ClientIp;
use crate::response::ApiError;
use crate::state::AppState;

/// Key used when the client IP cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window: window.max(Duration::from_millis(1)),
        }
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

/// Configured budgets for the public and admin-auth limiters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_public_requests")]
    pub public_requests: u32,
    #[serde(default = "default_window_secs")]
    pub public_window_secs: u64,
    #[serde(default = "default_admin_auth_requests")]
    pub admin_auth_requests: u32,
    #[serde(default = "default_window_secs")]
    pub admin_auth_window_secs: u64,
    /// Key clients by `X-Forwarded-For`/`X-Real-IP`. Enable only when every
    /// request arrives through a proxy that overwrites these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

fn default_public_requests() -> u32 {
    100
}

fn default_admin_auth_requests() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            public_requests: default_public_requests(),
            public_window_secs: default_window_secs(),
            admin_auth_requests: default_admin_auth_requests(),
            admin_auth_window_secs: default_window_secs(),
            trust_forwarded_headers: false,
        }
    }
}

impl RateLimitSettings {
    pub fn public(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.public_requests, Duration::from_secs(self.public_window_secs))
    }

    pub fn admin_auth(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.admin_auth_requests,
            Duration::from_secs(self.admin_auth_window_secs),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Whole seconds to advertise in `Retry-After`, at least one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Limited { retry_after } => Some(retry_after.as_secs_f64().ceil().max(1.0) as u64),
        }
    }
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_update: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        // saturating: a caller-supplied `now` may precede the last update
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        if now > self.last_update {
            self.last_update = now;
        }
        self.tokens = (self.tokens + elapsed * config.refill_per_sec()).min(f64::from(config.capacity));
    }

    fn decision(&self, config: &RateLimitConfig) -> Decision {
        if self.tokens >= 1.0 {
            Decision::Allowed
        } else {
            let missing = 1.0 - self.tokens;
            Decision::Limited {
                retry_after: Duration::from_secs_f64(missing / config.refill_per_sec()),
            }
        }
    }

    fn try_acquire(&mut self, config: &RateLimitConfig, now: Instant) -> Decision {
        self.refill(config, now);
        let decision = self.decision(config);
        if decision.is_allowed() {
            self.tokens -= 1.0;
        }
        decision
    }
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(self.config.capacity, now));
        bucket.try_acquire(&self.config, now)
    }

    /// Reports whether a request would be allowed without consuming a token.
    ///
    /// The admin-auth limiter peeks before validating a token and charges
    /// only failed attempts.
    pub fn peek(&self, key: &str) -> Decision {
        self.peek_at(key, Instant::now())
    }

    pub fn peek_at(&self, key: &str, now: Instant) -> Decision {
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(key) {
            Some(bucket) => {
                bucket.refill(&self.config, now);
                bucket.decision(&self.config)
            }
            None => Decision::Allowed,
        }
    }

    /// Drops buckets untouched for `max_idle`. Returns how many were removed.
    pub fn cleanup_stale(&self, max_idle: Duration) -> usize {
        self.cleanup_stale_at(max_idle, Instant::now())
    }

    pub fn cleanup_stale_at(&self, max_idle: Duration, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < max_idle);
        before - buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

pub type SharedRateLimiter = Arc<RateLimiter>;

/// Charges the public tracking budget before the handler parses anything.
pub async fn limit_public(
    State(state): State<AppState>,
    ip: ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let decision = state.rate_limiter.check(ip.key());
    if !decision.is_allowed() {
        metrics().rate_limited_requests.inc();
        debug!(ip = ip.key(), path = %request.uri().path(), "Public request rate limited");
        return ApiError::rate_limited(RateLimitErrorCode::Exceeded, decision.retry_after_secs())
            .into_response();
    }
    next.run(request).await
}
