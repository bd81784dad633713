use anyhow::Result;
use async_trait::async_trait;
use shared::{FinancingPayment, FinancingStatus, PaymentStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::columns::{count, date, decimal, encode_date, encode_timestamp, enumeration, timestamp};
use super::connection::DbConnection;
use crate::backend::storage::traits::{AppendOutcome, FinancingPaymentStorage};

#[derive(Clone)]
pub struct FinancingPaymentRepository {
    db: DbConnection,
}

impl FinancingPaymentRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn payment_from_row(row: &SqliteRow) -> Result<FinancingPayment> {
    Ok(FinancingPayment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        financing_id: row.try_get("financing_id")?,
        installment_number: count(row, "installment_number")?,
        sequence: count(row, "sequence")?,
        amount: decimal(row, "amount")?,
        principal_amount: decimal(row, "principal_amount")?,
        interest_amount: decimal(row, "interest_amount")?,
        balance_before: decimal(row, "balance_before")?,
        balance_after: decimal(row, "balance_after")?,
        payment_type: enumeration(row, "payment_type")?,
        status: enumeration(row, "status")?,
        payment_date: date(row, "payment_date")?,
        payment_method: row.try_get("payment_method")?,
        created_at: timestamp(row, "created_at")?,
    })
}

#[async_trait]
impl FinancingPaymentStorage for FinancingPaymentRepository {
    async fn list_payments(&self, financing_id: &str) -> Result<Vec<FinancingPayment>> {
        let rows = sqlx::query(
            "SELECT * FROM financing_payments WHERE financing_id = ? ORDER BY sequence",
        )
        .bind(financing_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    async fn append_payment(
        &self,
        payment: &FinancingPayment,
        settles_financing: bool,
    ) -> Result<AppendOutcome> {
        let mut tx = self.db.pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO financing_payments (
                id, user_id, financing_id, installment_number, sequence, amount,
                principal_amount, interest_amount, balance_before, balance_after,
                payment_type, status, payment_date, payment_method, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.user_id)
        .bind(&payment.financing_id)
        .bind(payment.installment_number as i64)
        .bind(payment.sequence as i64)
        .bind(payment.amount.to_string())
        .bind(payment.principal_amount.to_string())
        .bind(payment.interest_amount.to_string())
        .bind(payment.balance_before.to_string())
        .bind(payment.balance_after.to_string())
        .bind(payment.payment_type.as_str())
        .bind(payment.status.as_str())
        .bind(encode_date(payment.payment_date))
        .bind(&payment.payment_method)
        .bind(encode_timestamp(payment.created_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Two writers racing on one installment usually collide on sequence first,
                // so classify by what is stored rather than by the constraint that fired
                let installment_taken = sqlx::query(
                    r#"
                    SELECT 1 FROM financing_payments
                    WHERE financing_id = ? AND installment_number = ? AND status != ?
                    "#,
                )
                .bind(&payment.financing_id)
                .bind(payment.installment_number as i64)
                .bind(PaymentStatus::Cancelled.as_str())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
                let outcome = if installment_taken {
                    AppendOutcome::DuplicateInstallment
                } else {
                    AppendOutcome::StaleSequence
                };
                debug!(
                    "Rejected payment {} for financing {}: {:?}",
                    payment.id, payment.financing_id, outcome
                );
                tx.rollback().await?;
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        }

        if settles_financing {
            sqlx::query("UPDATE financings SET status = ?, updated_at = ? WHERE id = ?")
                .bind(FinancingStatus::Paid.as_str())
                .bind(encode_timestamp(payment.created_at))
                .bind(&payment.financing_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(AppendOutcome::Appended)
    }
}
