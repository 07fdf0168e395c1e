//! SQLite connection pool wrapper.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::schema::init_schema;

/// Handle to the analytics database.
///
/// Cloning is cheap; all clones share one pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl SqliteStore {
    /// Opens (creating if missing) the database and applies the schema.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Opened SQLite store"
        );

        let store = Self { pool, config };
        init_schema(&store).await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests.
    ///
    /// Each in-memory connection is its own database, so the pool is pinned
    /// to a single connection that is never recycled.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            config: StoreConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                ..StoreConfig::default()
            },
        };
        init_schema(&store).await?;
        Ok(store)
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
