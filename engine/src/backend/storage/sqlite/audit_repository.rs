use anyhow::Result;
use async_trait::async_trait;
use shared::AuditEntry;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::columns::{encode_timestamp, enumeration, timestamp};
use super::connection::DbConnection;
use crate::backend::storage::traits::AuditStorage;

#[derive(Clone)]
pub struct AuditRepository {
    db: DbConnection,
}

impl AuditRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.try_get("id")?,
        actor: row.try_get("actor")?,
        action: row.try_get("action")?,
        resource: row.try_get("resource")?,
        outcome: enumeration(row, "outcome")?,
        detail: row.try_get("detail")?,
        recorded_at: timestamp(row, "recorded_at")?,
    })
}

#[async_trait]
impl AuditStorage for AuditRepository {
    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, actor, action, resource, outcome, detail, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(entry.outcome.as_str())
        .bind(&entry.detail)
        .bind(encode_timestamp(entry.recorded_at))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn list_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY recorded_at DESC, id LIMIT ?")
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(audit_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::sqlite::test_utils::test_db;
    use shared::AuditOutcome;

    #[tokio::test]
    async fn test_record_and_list_audit_entries() {
        let repo = AuditRepository::new(test_db().await);

        let first = AuditEntry::new("scheduler", "job.finalize", "job::1", AuditOutcome::Success);
        let second = AuditEntry::new("admin", "financing.default", "financing::9", AuditOutcome::Failure)
            .with_detail("financing already paid");
        repo.record_audit(&first).await.unwrap();
        repo.record_audit(&second).await.unwrap();

        let entries = repo.list_audit_entries(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], second);
        assert_eq!(entries[1], first);

        assert_eq!(repo.list_audit_entries(1).await.unwrap().len(), 1);
    }
}
