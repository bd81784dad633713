use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Financing, FinancingStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::columns::{count, date, decimal, encode_date, encode_timestamp, enumeration, timestamp};
use super::connection::DbConnection;
use crate::backend::storage::traits::FinancingStorage;

#[derive(Clone)]
pub struct FinancingRepository {
    db: DbConnection,
}

impl FinancingRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn financing_from_row(row: &SqliteRow) -> Result<Financing> {
    Ok(Financing {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        description: row.try_get("description")?,
        principal: decimal(row, "principal")?,
        installment_count: count(row, "installment_count")?,
        start_date: date(row, "start_date")?,
        periodicity: enumeration(row, "periodicity")?,
        status: enumeration(row, "status")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[async_trait]
impl FinancingStorage for FinancingRepository {
    async fn store_financing(&self, financing: &Financing) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO financings (
                id, user_id, description, principal, installment_count, start_date,
                periodicity, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&financing.id)
        .bind(&financing.user_id)
        .bind(&financing.description)
        .bind(financing.principal.to_string())
        .bind(financing.installment_count as i64)
        .bind(encode_date(financing.start_date))
        .bind(financing.periodicity.as_str())
        .bind(financing.status.as_str())
        .bind(encode_timestamp(financing.created_at))
        .bind(encode_timestamp(financing.updated_at))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_financing(&self, financing_id: &str) -> Result<Option<Financing>> {
        let row = sqlx::query("SELECT * FROM financings WHERE id = ?")
            .bind(financing_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(financing_from_row).transpose()
    }

    async fn list_financings_by_status(&self, status: FinancingStatus) -> Result<Vec<Financing>> {
        let rows = sqlx::query("SELECT * FROM financings WHERE status = ? ORDER BY created_at, id")
            .bind(status.as_str())
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(financing_from_row).collect()
    }

    async fn update_financing_status(
        &self,
        financing_id: &str,
        status: FinancingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE financings SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(encode_timestamp(updated_at))
            .bind(financing_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
