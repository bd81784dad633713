use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{FixedAccountTransaction, PaymentStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use super::columns::{
    date, decimal, encode_date, encode_timestamp, enumeration, optional_date, timestamp,
};
use super::connection::DbConnection;
use super::fixed_account_repository::advance_cycle;
use crate::backend::storage::traits::{CycleAdvance, FixedAccountTransactionStorage, MaterializeWrite};

#[derive(Clone)]
pub struct FixedAccountTransactionRepository {
    db: DbConnection,
}

impl FixedAccountTransactionRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn instance_from_row(row: &SqliteRow) -> Result<FixedAccountTransaction> {
    Ok(FixedAccountTransaction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        fixed_account_id: row.try_get("fixed_account_id")?,
        due_date: date(row, "due_date")?,
        amount: decimal(row, "amount")?,
        status: enumeration(row, "status")?,
        payment_date: optional_date(row, "payment_date")?,
        payment_method: row.try_get("payment_method")?,
        ledger_transaction_id: row.try_get("ledger_transaction_id")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

/// Insert an instance unless its cycle already exists. Returns whether a row was added.
pub(super) async fn insert_instance<'e, E>(executor: E, instance: &FixedAccountTransaction) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO fixed_account_transactions (
            id, user_id, fixed_account_id, due_date, amount, status, payment_date,
            payment_method, ledger_transaction_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (fixed_account_id, due_date) DO NOTHING
        "#,
    )
    .bind(&instance.id)
    .bind(&instance.user_id)
    .bind(&instance.fixed_account_id)
    .bind(encode_date(instance.due_date))
    .bind(instance.amount.to_string())
    .bind(instance.status.as_str())
    .bind(instance.payment_date.map(encode_date))
    .bind(&instance.payment_method)
    .bind(&instance.ledger_transaction_id)
    .bind(encode_timestamp(instance.created_at))
    .bind(encode_timestamp(instance.updated_at))
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl FixedAccountTransactionStorage for FixedAccountTransactionRepository {
    async fn materialize_instance(
        &self,
        instance: &FixedAccountTransaction,
        advance: Option<&CycleAdvance>,
    ) -> Result<MaterializeWrite> {
        let mut tx = self.db.pool().begin().await?;
        let inserted = insert_instance(&mut *tx, instance).await?;

        let Some(advance) = advance else {
            tx.commit().await?;
            return Ok(if inserted {
                MaterializeWrite::Created
            } else {
                MaterializeWrite::InstanceExists { account_advanced: false }
            });
        };

        let advanced = advance_cycle(&mut *tx, advance).await?;
        if inserted && !advanced {
            // Account was deactivated or rolled by someone else since it was read
            tx.rollback().await?;
            return Ok(MaterializeWrite::AccountMoved);
        }

        tx.commit().await?;
        Ok(if inserted {
            MaterializeWrite::Created
        } else {
            MaterializeWrite::InstanceExists { account_advanced: advanced }
        })
    }

    async fn get_instance(&self, transaction_id: &str) -> Result<Option<FixedAccountTransaction>> {
        let row = sqlx::query("SELECT * FROM fixed_account_transactions WHERE id = ?")
            .bind(transaction_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn find_instance(
        &self,
        fixed_account_id: &str,
        due_date: NaiveDate,
    ) -> Result<Option<FixedAccountTransaction>> {
        let row = sqlx::query(
            "SELECT * FROM fixed_account_transactions WHERE fixed_account_id = ? AND due_date = ?",
        )
        .bind(fixed_account_id)
        .bind(encode_date(due_date))
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn list_instances(&self, fixed_account_id: &str) -> Result<Vec<FixedAccountTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM fixed_account_transactions WHERE fixed_account_id = ? ORDER BY due_date",
        )
        .bind(fixed_account_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    async fn list_instances_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<FixedAccountTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM fixed_account_transactions WHERE status = ? ORDER BY due_date, id",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    async fn update_instance(&self, instance: &FixedAccountTransaction) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fixed_account_transactions
            SET status = ?, payment_date = ?, payment_method = ?, ledger_transaction_id = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(instance.status.as_str())
        .bind(instance.payment_date.map(encode_date))
        .bind(&instance.payment_method)
        .bind(&instance.ledger_transaction_id)
        .bind(encode_timestamp(instance.updated_at))
        .bind(&instance.id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn mark_overdue_before(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<FixedAccountTransaction>> {
        let rows = sqlx::query(
            r#"
            UPDATE fixed_account_transactions
            SET status = ?, updated_at = ?
            WHERE status = ? AND due_date < ?
            RETURNING *
            "#,
        )
        .bind(PaymentStatus::Overdue.as_str())
        .bind(encode_timestamp(now))
        .bind(PaymentStatus::Pending.as_str())
        .bind(encode_date(today))
        .fetch_all(self.db.pool())
        .await?;

        let mut swept = rows.iter().map(instance_from_row).collect::<Result<Vec<_>>>()?;
        swept.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        Ok(swept)
    }
}
