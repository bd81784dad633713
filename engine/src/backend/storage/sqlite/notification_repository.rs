use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Notification, RelatedEntity};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::columns::{encode_timestamp, enumeration, timestamp};
use super::connection::DbConnection;
use crate::backend::storage::traits::{NotificationStorage, UpsertOutcome};

#[derive(Clone)]
pub struct NotificationRepository {
    db: DbConnection,
}

impl NotificationRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    let related_kind: String = row.try_get("related_kind")?;
    let related_id: String = row.try_get("related_id")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: enumeration(row, "kind")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        related: RelatedEntity::from_parts(&related_kind, related_id),
        is_read: row.try_get("is_read")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

/// Flattened (kind, id) of the related entity; empty strings when there is none
fn related_parts(related: &Option<RelatedEntity>) -> (&str, &str) {
    match related {
        Some(entity) => (entity.kind(), entity.id()),
        None => ("", ""),
    }
}

#[async_trait]
impl NotificationStorage for NotificationRepository {
    async fn upsert_notification(&self, notification: &Notification) -> Result<UpsertOutcome> {
        let (related_kind, related_id) = related_parts(&notification.related);

        let inserted = sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, kind, title, message, related_kind, related_id, is_read,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, kind, related_kind, related_id) DO NOTHING
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(related_kind)
        .bind(related_id)
        .bind(notification.is_read)
        .bind(encode_timestamp(notification.created_at))
        .bind(encode_timestamp(notification.updated_at))
        .execute(self.db.pool())
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(UpsertOutcome::Created);
        }

        sqlx::query(
            r#"
            UPDATE notifications
            SET title = ?, message = ?, updated_at = ?
            WHERE user_id = ? AND kind = ? AND related_kind = ? AND related_id = ?
            "#,
        )
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(encode_timestamp(notification.updated_at))
        .bind(&notification.user_id)
        .bind(notification.kind.as_str())
        .bind(related_kind)
        .bind(related_id)
        .execute(self.db.pool())
        .await?;

        Ok(UpsertOutcome::Updated)
    }

    async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY updated_at DESC, id",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(notification_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE is_read = 1 AND updated_at < ?")
            .bind(encode_timestamp(cutoff))
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
