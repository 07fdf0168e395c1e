//! Common test setup functions.

use std::sync::Arc;

use analytics_core::{AnalyticsConfig, ReferentialPolicy};
use analytics_store::{AnalyticsWriter, SqliteStore};
use api::middleware::rate_limit::RateLimitSettings;
use api::{router, AppState, Catalog};
use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, Utc};

use crate::mocks::MockWriter;

/// Test context with an in-memory store and mock auth.
///
/// Exercises the same production code paths as the service:
/// - the real Axum router with all middleware
/// - `MockWriter`, which implements `AnalyticsWriter` over the real store
/// - the auth client in mock mode, accepting any well-formed admin token
pub struct TestContext {
    pub store: SqliteStore,
    pub writer: Arc<MockWriter>,
    pub state: AppState,
    pub router: Router,
}

/// Generous collector timeout: the in-memory store has one connection and
/// sampling writes compete with tracked events for it.
pub fn test_config() -> AnalyticsConfig {
    AnalyticsConfig {
        collector_timeout_ms: 5_000,
        ..AnalyticsConfig::default()
    }
}

/// Default budgets over an hour-long window, so a test loop cannot earn a
/// token back while it runs. Clients are told apart by `X-Forwarded-For`,
/// as behind a trusted proxy.
pub fn slow_refill_limits() -> RateLimitSettings {
    RateLimitSettings {
        public_window_secs: 3_600,
        admin_auth_window_secs: 3_600,
        trust_forwarded_headers: true,
        ..RateLimitSettings::default()
    }
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config(), None).await
    }

    pub async fn with_catalog(catalog: Arc<dyn Catalog>, policy: ReferentialPolicy) -> Self {
        let config = AnalyticsConfig {
            referential_policy: policy,
            ..test_config()
        };
        Self::with_config(config, Some(catalog)).await
    }

    pub async fn with_config(config: AnalyticsConfig, catalog: Option<Arc<dyn Catalog>>) -> Self {
        let store = SqliteStore::in_memory()
            .await
            .expect("Failed to open in-memory store");
        let writer = Arc::new(MockWriter::new(store.clone()));

        let mut state = AppState::new(store.clone(), "mock", config)
            .expect("Failed to build state")
            .with_writer(writer.clone() as Arc<dyn AnalyticsWriter>);
        if let Some(catalog) = catalog {
            state = state.with_catalog(catalog);
        }
        let router = router(state.clone());

        Self {
            store,
            writer,
            state,
            router,
        }
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(self.router.clone()).expect("Failed to create test server")
    }

    /// Server sharing this context's store but with its own limiters.
    pub fn server_with_rate_limits(&self, settings: &RateLimitSettings) -> TestServer {
        let state = self.state.clone().with_rate_limits(settings);
        TestServer::new(router(state)).expect("Failed to create test server")
    }

    /// Raw events stored so far.
    pub async fn event_count(&self) -> i64 {
        self.store
            .count_events_since(DateTime::<Utc>::MIN_UTC)
            .await
            .expect("Count query failed")
    }
}
