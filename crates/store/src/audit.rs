//! Admin audit log persistence.

use analytics_core::{from_millis, to_millis, AuditEntry, AuditOutcome, AuditRecord};
use sqlx::Row;

use crate::client::SqliteStore;
use crate::error::{StoreError, StoreResult};

impl SqliteStore {
    pub async fn insert_audit(&self, entry: &AuditEntry) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (actor, action, target, details, ip, outcome, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(entry.target.as_deref())
        .bind(entry.details.to_string())
        .bind(entry.ip.as_deref())
        .bind(entry.outcome.as_str())
        .bind(to_millis(entry.created_at))
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest entries first.
    pub async fn recent_audit(&self, limit: u32) -> StoreResult<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor, action, target, details, ip, outcome, created_at
            FROM audit_log
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<AuditRecord> {
                let details: String = row.try_get("details")?;
                let outcome: String = row.try_get("outcome")?;
                let outcome: AuditOutcome = outcome
                    .parse()
                    .map_err(|e: analytics_core::Error| StoreError::Corrupt(e.to_string()))?;
                Ok(AuditRecord {
                    id: row.try_get("id")?,
                    entry: AuditEntry {
                        actor: row.try_get("actor")?,
                        action: row.try_get("action")?,
                        target: row.try_get("target")?,
                        details: serde_json::from_str(&details).unwrap_or_default(),
                        ip: row.try_get("ip")?,
                        outcome,
                        created_at: from_millis(row.try_get("created_at")?),
                    },
                })
            })
            .collect()
    }

    pub async fn count_audit(&self, action: &str, outcome: AuditOutcome) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_log WHERE action = ?1 AND outcome = ?2",
        )
        .bind(action)
        .bind(outcome.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}
