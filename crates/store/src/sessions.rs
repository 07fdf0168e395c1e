//! Session persistence.
//!
//! A touch runs as one write transaction: close the token's open session if
//! it went idle, then insert or extend the open session with a single upsert.
//! SQLite serializes writers, so concurrent touches for one token never lose
//! a page view increment.

use analytics_core::{from_millis, to_millis, ClientInfo, Session, SessionTouch};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::client::SqliteStore;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub id: String,
    pub session_token: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub start_time: i64,
    pub last_activity: i64,
    pub page_view_count: i64,
    pub duration_ms: i64,
    pub active: bool,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> StoreResult<Self> {
        Ok(Session {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| StoreError::Corrupt(format!("session id {}: {e}", row.id)))?,
            session_token: row.session_token,
            ip: row.ip,
            user_agent: row.user_agent,
            referrer: row.referrer,
            start_time: from_millis(row.start_time),
            last_activity: from_millis(row.last_activity),
            page_view_count: row.page_view_count,
            duration_ms: row.duration_ms,
            active: row.active,
        })
    }
}

pub(crate) const SESSION_COLUMNS: &str = "id, session_token, ip, user_agent, referrer, start_time, last_activity, page_view_count, duration_ms, active";

impl SqliteStore {
    /// Opens or extends the session for `token` at `at`.
    pub async fn record_activity(
        &self,
        token: &str,
        client: &ClientInfo,
        at: DateTime<Utc>,
        idle: Duration,
    ) -> StoreResult<SessionTouch> {
        let at_ms = to_millis(at);
        let idle_cutoff = to_millis(at - idle);
        let candidate = Uuid::new_v4();

        let mut tx = self.pool().begin().await?;

        // Write first so the transaction takes the write lock immediately.
        let closed = sqlx::query(
            "UPDATE sessions SET active = 0 WHERE session_token = ?1 AND active = 1 AND last_activity < ?2",
        )
        .bind(token)
        .bind(idle_cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO sessions
                (id, session_token, ip, user_agent, referrer, start_time, last_activity, page_view_count, duration_ms, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 1, 0, 1)
            ON CONFLICT(session_token) WHERE active = 1 DO UPDATE SET
                last_activity = MAX(last_activity, excluded.last_activity),
                page_view_count = page_view_count + 1,
                duration_ms = MAX(last_activity, excluded.last_activity) - start_time
            RETURNING id
            "#,
        )
        .bind(candidate.to_string())
        .bind(token)
        .bind(client.ip.as_deref())
        .bind(client.user_agent.as_deref())
        .bind(client.referrer.as_deref())
        .bind(at_ms)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let session_id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::Corrupt(format!("session id {id}: {e}")))?;
        let is_new = session_id == candidate;
        if is_new {
            debug!(%session_id, expired_previous = closed > 0, "Opened session");
        }
        Ok(SessionTouch { session_id, is_new })
    }

    pub async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let row: Option<SessionRow> = sqlx::query_as(&query)
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(Session::try_from).transpose()
    }

    /// All sessions ever opened for a token, oldest first.
    pub async fn sessions_for_token(&self, token: &str) -> StoreResult<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_token = ?1 ORDER BY start_time, id"
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&query)
            .bind(token)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Sessions whose last activity falls within the trailing window.
    pub async fn count_active_sessions(&self, since: DateTime<Utc>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE active = 1 AND last_activity >= ?1",
        )
        .bind(to_millis(since))
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }

    /// Materializes `active = 0` for sessions idle longer than `idle`.
    ///
    /// Only an index hint: readers apply the idle predicate themselves.
    pub async fn sweep_expired_sessions(
        &self,
        now: DateTime<Utc>,
        idle: Duration,
    ) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE sessions SET active = 0 WHERE active = 1 AND last_activity < ?1")
            .bind(to_millis(now - idle))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
