use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{FixedAccount, FixedAccountTransaction};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use super::columns::{count, date, decimal, encode_date, encode_timestamp, enumeration, timestamp};
use super::connection::DbConnection;
use super::fixed_account_transaction_repository::insert_instance;
use crate::backend::storage::traits::{CycleAdvance, FixedAccountStorage};

#[derive(Clone)]
pub struct FixedAccountRepository {
    db: DbConnection,
}

impl FixedAccountRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn fixed_account_from_row(row: &SqliteRow) -> Result<FixedAccount> {
    Ok(FixedAccount {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        description: row.try_get("description")?,
        amount: decimal(row, "amount")?,
        periodicity: enumeration(row, "periodicity")?,
        account_type: enumeration(row, "account_type")?,
        start_date: date(row, "start_date")?,
        next_due_date: date(row, "next_due_date")?,
        is_active: row.try_get("is_active")?,
        is_paid: row.try_get("is_paid")?,
        reminder_days: count(row, "reminder_days")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

async fn insert_fixed_account<'e, E>(executor: E, account: &FixedAccount) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO fixed_accounts (
            id, user_id, description, amount, periodicity, account_type, start_date,
            next_due_date, is_active, is_paid, reminder_days, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&account.id)
    .bind(&account.user_id)
    .bind(&account.description)
    .bind(account.amount.to_string())
    .bind(account.periodicity.as_str())
    .bind(account.account_type.as_str())
    .bind(encode_date(account.start_date))
    .bind(encode_date(account.next_due_date))
    .bind(account.is_active)
    .bind(account.is_paid)
    .bind(account.reminder_days as i64)
    .bind(encode_timestamp(account.created_at))
    .bind(encode_timestamp(account.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Roll an account to its next cycle if it is still active and on `from_due_date`.
/// Shared with the instance repository so the advance runs inside its transaction.
pub(super) async fn advance_cycle<'e, E>(executor: E, advance: &CycleAdvance) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE fixed_accounts
        SET next_due_date = ?, is_paid = 0, updated_at = ?
        WHERE id = ? AND next_due_date = ? AND is_active = 1
        "#,
    )
    .bind(encode_date(advance.to_due_date))
    .bind(encode_timestamp(advance.updated_at))
    .bind(&advance.fixed_account_id)
    .bind(encode_date(advance.from_due_date))
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl FixedAccountStorage for FixedAccountRepository {
    async fn store_fixed_account(&self, account: &FixedAccount) -> Result<()> {
        insert_fixed_account(self.db.pool(), account).await
    }

    async fn open_fixed_account(
        &self,
        account: &FixedAccount,
        first_instance: &FixedAccountTransaction,
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        insert_fixed_account(&mut *tx, account).await?;
        if !insert_instance(&mut *tx, first_instance).await? {
            anyhow::bail!(
                "instance due {} already exists for new fixed account {}",
                first_instance.due_date,
                account.id
            );
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_fixed_account(&self, fixed_account_id: &str) -> Result<Option<FixedAccount>> {
        let row = sqlx::query("SELECT * FROM fixed_accounts WHERE id = ?")
            .bind(fixed_account_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(fixed_account_from_row).transpose()
    }

    async fn list_active_fixed_accounts(&self) -> Result<Vec<FixedAccount>> {
        let rows = sqlx::query(
            "SELECT * FROM fixed_accounts WHERE is_active = 1 ORDER BY next_due_date, id",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(fixed_account_from_row).collect()
    }

    async fn list_fixed_accounts(&self, user_id: &str) -> Result<Vec<FixedAccount>> {
        let rows = sqlx::query("SELECT * FROM fixed_accounts WHERE user_id = ? ORDER BY created_at, id")
            .bind(user_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(fixed_account_from_row).collect()
    }

    async fn mark_cycle_paid(
        &self,
        fixed_account_id: &str,
        due_date: NaiveDate,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE fixed_accounts SET is_paid = 1, updated_at = ? WHERE id = ? AND next_due_date = ?",
        )
        .bind(encode_timestamp(updated_at))
        .bind(fixed_account_id)
        .bind(encode_date(due_date))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_fixed_account(
        &self,
        fixed_account_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE fixed_accounts SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(encode_timestamp(updated_at))
        .bind(fixed_account_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
