//! Store health checks.

use tracing::{debug, error};

use crate::client::SqliteStore;

/// Check that the database answers a trivial query.
pub async fn check_connection(store: &SqliteStore) -> bool {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(store.pool())
        .await
    {
        Ok(_) => {
            debug!("SQLite connection healthy");
            true
        }
        Err(e) => {
            error!("SQLite health check failed: {}", e);
            false
        }
    }
}
