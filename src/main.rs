//! Venue Analytics Service
//!
//! Analytics pipeline for the venue discovery platform:
//! - Public event, search, share and favorite tracking with per-IP rate limits
//! - Idle-timeout sessions keyed by a client token
//! - Scheduled daily rollups per venue and content item
//! - Admin dashboards, real-time panel and CSV exports with an audit trail

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use analytics_core::AnalyticsConfig;
use analytics_store::{health::check_connection, SqliteStore, StoreConfig};
use api::middleware::rate_limit::RateLimitSettings;
use api::{router, AppState, HttpCatalog};
use telemetry::{health, init_tracing_from_env};
use worker::{WorkerConfig, WorkerScheduler};

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    /// Auth service URL for admin token validation; empty or `mock` accepts any well-formed token
    #[serde(default = "default_auth_url")]
    auth_url: String,

    /// Venue/content catalog service; unset disables enrichment and name lookup
    #[serde(default)]
    catalog_url: Option<String>,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    analytics: AnalyticsConfig,

    #[serde(default)]
    worker: WorkerConfig,

    #[serde(default)]
    rate_limit: RateLimitSettings,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_auth_url() -> String {
    "http://auth-service:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_url: default_auth_url(),
            catalog_url: None,
            store: StoreConfig::default(),
            analytics: AnalyticsConfig::default(),
            worker: WorkerConfig::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Venue Analytics v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let store = SqliteStore::connect(config.store.clone())
        .await
        .context("Failed to open analytics store")?;
    check_health(&store).await;

    let mut state = AppState::new(store.clone(), &config.auth_url, config.analytics.clone())
        .context("Failed to create application state")?
        .with_rate_limits(&config.rate_limit);
    if state.auth_client.is_mock() {
        warn!("Auth service in mock mode: any well-formed admin token is accepted");
    }

    match config.catalog_url.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(url) => {
            let catalog = HttpCatalog::new(url).context("Failed to create catalog client")?;
            state = state.with_catalog(Arc::new(catalog));
            info!(catalog_url = url, "Catalog enrichment enabled");
        }
        None => info!("No catalog configured; venue and content names will be null"),
    }

    // Scheduler and manual triggers share one aggregator so a date never runs twice at once
    let scheduler = Arc::new(WorkerScheduler::new(
        config.worker.clone(),
        store.clone(),
        state.aggregator.clone(),
        config.analytics.session_idle(),
    ));
    let _worker_handles = scheduler.start();

    let _rate_limiter_cleanup = state.start_rate_limiter_cleanup();
    info!("Started rate limiter cleanup task (every 5 minutes)");

    if state.trust_forwarded_headers {
        info!("Client IPs taken from X-Forwarded-For behind a trusted proxy");
    }
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("VENUE_ANALYTICS")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Flat names for the settings operators change most
    if let Ok(url) = std::env::var("VENUE_ANALYTICS_DATABASE_URL") {
        config.store.url = url;
    }
    if let Ok(auth_url) = std::env::var("VENUE_ANALYTICS_AUTH_URL") {
        config.auth_url = auth_url;
    }
    if let Ok(catalog_url) = std::env::var("VENUE_ANALYTICS_CATALOG_URL") {
        config.catalog_url = Some(catalog_url);
    }

    Ok(config)
}

/// Check component health on startup.
async fn check_health(store: &SqliteStore) {
    if check_connection(store).await {
        health().store.set_healthy();
        info!("Store connection: healthy");
    } else {
        health().store.set_unhealthy("Connection failed");
        error!("Store connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
