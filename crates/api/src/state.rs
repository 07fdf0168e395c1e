//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use analytics_core::{AdminToken, AnalyticsConfig, AuditEntry, AuthRequest, AuthResponse, Error, Result};
use analytics_store::{AnalyticsWriter, SqliteStore};
use moka::future::Cache;
use telemetry::health;
use tracing::{debug, error, warn};
use worker::{Aggregator, RetentionWorker};

use crate::catalog::Catalog;
use crate::middleware::rate_limit::{RateLimitSettings, RateLimiter, SharedRateLimiter};
use crate::services::{
    DashboardService, EventCollector, ExportService, RealtimeEngine, SessionTracker,
};

/// Cache TTL for auth responses (30 seconds).
const AUTH_CACHE_TTL: Duration = Duration::from_secs(30);

const AUTH_CACHE_MAX_CAPACITY: u64 = 10_000;

/// Idle rate-limit buckets older than this are dropped by the cleanup task.
const RATE_LIMIT_BUCKET_MAX_IDLE: Duration = Duration::from_secs(600);

pub const MOCK_ADMIN_USERNAME: &str = "mock-admin";

/// Client for the external auth service.
///
/// Calls `{base_url}/internal/auth/validate` and caches responses for 30
/// seconds. An empty URL or `"mock"` accepts every well-formed token.
#[derive(Clone)]
pub struct AuthClient {
    base_url: String,
    http_client: reqwest::Client,
    cache: Cache<String, AuthResponse>,
    mock_mode: bool,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let mock_mode = base_url.is_empty() || base_url == "mock";

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::internal(format!("Failed to create auth HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            cache: Cache::builder()
                .max_capacity(AUTH_CACHE_MAX_CAPACITY)
                .time_to_live(AUTH_CACHE_TTL)
                .build(),
            mock_mode,
        })
    }

    pub fn is_mock(&self) -> bool {
        self.mock_mode
    }

    /// Validates an admin token, serving repeated tokens from the cache.
    pub async fn validate(&self, token: &AdminToken) -> Result<AuthResponse> {
        let cache_key = token.as_str().to_string();

        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!("Auth cache hit");
            return Ok(cached);
        }

        let response = if self.mock_mode {
            mock_validate()
        } else {
            self.remote_validate(token).await?
        };

        self.cache.insert(cache_key, response.clone()).await;
        Ok(response)
    }

    async fn remote_validate(&self, token: &AdminToken) -> Result<AuthResponse> {
        let url = format!("{}/internal/auth/validate", self.base_url);
        debug!(url = %url, "Calling auth service");

        let response = self
            .http_client
            .post(&url)
            .json(&AuthRequest::admin(token))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Auth service request failed");
                health().auth.set_unhealthy(e.to_string());
                Error::internal(format!("Auth service unavailable: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Auth service returned error");
            health().auth.set_unhealthy(format!("auth service returned {status}"));
            return Err(Error::internal(format!("Auth service returned {status}")));
        }

        health().auth.set_healthy();
        response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse auth response");
            Error::internal(format!("Invalid auth response: {e}"))
        })
    }

    pub async fn invalidate(&self, token: &AdminToken) {
        self.cache.invalidate(token.as_str()).await;
    }
}

fn mock_validate() -> AuthResponse {
    debug!("Using mock auth validation");
    AuthResponse {
        valid: true,
        username: Some(MOCK_ADMIN_USERNAME.to_string()),
        is_admin: true,
        error: None,
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    /// Public write path; the store in production, a substitute in tests.
    pub writer: Arc<dyn AnalyticsWriter>,
    pub auth_client: AuthClient,
    pub catalog: Option<Arc<dyn Catalog>>,
    pub rate_limiter: SharedRateLimiter,
    pub admin_rate_limiter: SharedRateLimiter,
    pub aggregator: Aggregator<SqliteStore>,
    pub config: Arc<AnalyticsConfig>,
    /// Whether client IPs come from forwarding headers or the peer address.
    pub trust_forwarded_headers: bool,
}

impl AppState {
    pub fn new(store: SqliteStore, auth_url: impl Into<String>, config: AnalyticsConfig) -> Result<Self> {
        let settings = RateLimitSettings::default();
        Ok(Self {
            writer: Arc::new(store.clone()),
            aggregator: Aggregator::new(Arc::new(store.clone())),
            store,
            auth_client: AuthClient::new(auth_url)?,
            catalog: None,
            rate_limiter: Arc::new(RateLimiter::new(settings.public())),
            admin_rate_limiter: Arc::new(RateLimiter::new(settings.admin_auth())),
            config: Arc::new(config),
            trust_forwarded_headers: settings.trust_forwarded_headers,
        })
    }

    pub fn with_writer(mut self, writer: Arc<dyn AnalyticsWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_rate_limits(mut self, settings: &RateLimitSettings) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(settings.public()));
        self.admin_rate_limiter = Arc::new(RateLimiter::new(settings.admin_auth()));
        self.trust_forwarded_headers = settings.trust_forwarded_headers;
        self
    }

    /// Shares an aggregator (and its per-date guard) with the scheduler.
    pub fn with_aggregator(mut self, aggregator: Aggregator<SqliteStore>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn sessions(&self) -> SessionTracker {
        SessionTracker::new(self.writer.clone(), self.config.session_idle())
    }

    pub fn collector(&self) -> EventCollector {
        EventCollector::new(
            self.writer.clone(),
            self.sessions(),
            self.catalog.clone(),
            &self.config,
        )
    }

    pub fn realtime(&self) -> RealtimeEngine {
        RealtimeEngine::new(self.store.clone(), self.config.clone())
    }

    pub fn dashboard(&self) -> DashboardService {
        DashboardService::new(self.store.clone(), self.realtime(), self.catalog.clone())
    }

    pub fn exporter(&self) -> ExportService {
        ExportService::new(self.store.clone(), self.config.max_export_rows)
    }

    pub fn retention(&self) -> RetentionWorker {
        RetentionWorker::new(self.store.clone(), self.config.retention_policy())
    }

    /// Appends to the audit log. Failures are logged, never surfaced.
    pub async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.insert_audit(&entry).await {
            error!(action = %entry.action, actor = %entry.actor, error = %e, "Failed to write audit entry");
        }
    }

    /// Starts the rate limiter cleanup task (every 5 minutes).
    pub fn start_rate_limiter_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let limiters = [self.rate_limiter.clone(), self.admin_rate_limiter.clone()];
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                for limiter in &limiters {
                    let removed = limiter.cleanup_stale(RATE_LIMIT_BUCKET_MAX_IDLE);
                    if removed > 0 {
                        debug!(removed, "Dropped idle rate limit buckets");
                    }
                }
            }
        })
    }
}
