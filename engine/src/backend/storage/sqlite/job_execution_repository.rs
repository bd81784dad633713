use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{JobExecution, JobStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::columns::{count, encode_timestamp, enumeration, optional_timestamp, timestamp};
use super::connection::DbConnection;
use crate::backend::storage::traits::JobExecutionStorage;

#[derive(Clone)]
pub struct JobExecutionRepository {
    db: DbConnection,
}

impl JobExecutionRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn execution_from_row(row: &SqliteRow) -> Result<JobExecution> {
    let metadata: String = row.try_get("metadata")?;
    Ok(JobExecution {
        id: row.try_get("id")?,
        job_name: row.try_get("job_name")?,
        status: enumeration(row, "status")?,
        started_at: timestamp(row, "started_at")?,
        finished_at: optional_timestamp(row, "finished_at")?,
        duration_ms: row.try_get("duration_ms")?,
        notifications_created: count(row, "notifications_created")?,
        notifications_updated: count(row, "notifications_updated")?,
        error_message: row.try_get("error_message")?,
        error_stack: row.try_get("error_stack")?,
        metadata: serde_json::from_str(&metadata).context("Invalid job metadata")?,
    })
}

#[async_trait]
impl JobExecutionStorage for JobExecutionRepository {
    async fn start_execution(&self, execution: &JobExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_executions (
                id, job_name, status, started_at, finished_at, duration_ms,
                notifications_created, notifications_updated, error_message, error_stack, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.job_name)
        .bind(execution.status.as_str())
        .bind(encode_timestamp(execution.started_at))
        .bind(execution.finished_at.map(encode_timestamp))
        .bind(execution.duration_ms)
        .bind(execution.notifications_created as i64)
        .bind(execution.notifications_updated as i64)
        .bind(&execution.error_message)
        .bind(&execution.error_stack)
        .bind(execution.metadata.to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn finalize_execution(&self, execution: &JobExecution) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = ?, finished_at = ?, duration_ms = ?, notifications_created = ?,
                notifications_updated = ?, error_message = ?, error_stack = ?, metadata = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(execution.finished_at.map(encode_timestamp))
        .bind(execution.duration_ms)
        .bind(execution.notifications_created as i64)
        .bind(execution.notifications_updated as i64)
        .bind(&execution.error_message)
        .bind(&execution.error_stack)
        .bind(execution.metadata.to_string())
        .bind(&execution.id)
        .bind(JobStatus::Running.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<JobExecution>> {
        let row = sqlx::query("SELECT * FROM job_executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(&self, job_name: &str, limit: u32) -> Result<Vec<JobExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM job_executions WHERE job_name = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(job_name)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn latest_success_since(
        &self,
        job_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<JobExecution>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM job_executions
            WHERE job_name = ? AND status = ? AND started_at >= ?
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_name)
        .bind(JobStatus::Success.as_str())
        .bind(encode_timestamp(since))
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_running_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM job_executions WHERE status = ? AND started_at < ? ORDER BY started_at",
        )
        .bind(JobStatus::Running.as_str())
        .bind(encode_timestamp(cutoff))
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_executions WHERE status != ? AND started_at < ?")
            .bind(JobStatus::Running.as_str())
            .bind(encode_timestamp(cutoff))
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
