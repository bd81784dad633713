//! CSV statements for a financing's payment ledger and a fixed account's instances.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{FinancingPayment, FixedAccountTransaction};
use std::sync::Arc;
use tracing::info;

use crate::backend::domain::errors::LedgerResult;
use crate::backend::domain::financing_service::FinancingService;
use crate::backend::domain::money::{format_iso_date, round_money};
use crate::backend::domain::recurrence_service::RecurrenceService;
use crate::backend::storage::Connection;

/// A rendered statement ready to be saved or sent
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedStatement {
    pub filename: String,
    pub content: String,
    pub row_count: usize,
}

#[derive(Serialize)]
struct PaymentRow {
    sequence: u32,
    installment_number: u32,
    payment_date: String,
    payment_type: &'static str,
    status: &'static str,
    amount: String,
    principal_amount: String,
    interest_amount: String,
    balance_before: String,
    balance_after: String,
    payment_method: String,
}

impl From<&FinancingPayment> for PaymentRow {
    fn from(payment: &FinancingPayment) -> Self {
        Self {
            sequence: payment.sequence,
            installment_number: payment.installment_number,
            payment_date: format_iso_date(payment.payment_date),
            payment_type: payment.payment_type.as_str(),
            status: payment.status.as_str(),
            amount: money_cell(payment.amount),
            principal_amount: money_cell(payment.principal_amount),
            interest_amount: money_cell(payment.interest_amount),
            balance_before: money_cell(payment.balance_before),
            balance_after: money_cell(payment.balance_after),
            payment_method: payment.payment_method.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct InstanceRow {
    due_date: String,
    amount: String,
    status: &'static str,
    payment_date: String,
    payment_method: String,
    ledger_transaction_id: String,
}

impl From<&FixedAccountTransaction> for InstanceRow {
    fn from(instance: &FixedAccountTransaction) -> Self {
        Self {
            due_date: format_iso_date(instance.due_date),
            amount: money_cell(instance.amount),
            status: instance.status.as_str(),
            payment_date: instance.payment_date.map(format_iso_date).unwrap_or_default(),
            payment_method: instance.payment_method.clone().unwrap_or_default(),
            ledger_transaction_id: instance.ledger_transaction_id.clone().unwrap_or_default(),
        }
    }
}

fn money_cell(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}

fn render<R: Serialize>(rows: impl IntoIterator<Item = R>) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}

fn statement_filename(description: &str, kind: &str, on: NaiveDate) -> String {
    let slug: String = description
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}_{}.csv", slug, kind, on.format("%Y%m%d"))
}

#[derive(Clone)]
pub struct ExportService<C: Connection> {
    financing_service: FinancingService<C>,
    recurrence_service: RecurrenceService<C>,
}

impl<C: Connection> ExportService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            financing_service: FinancingService::new(connection.clone()),
            recurrence_service: RecurrenceService::new(connection),
        }
    }

    /// Payment log of a financing in append order, one row per entry
    pub async fn export_financing_payments(&self, financing_id: &str) -> LedgerResult<ExportedStatement> {
        let financing = self.financing_service.get_financing(financing_id).await?;
        let payments = self.financing_service.list_payments(financing_id).await?;

        let content = render(payments.iter().map(PaymentRow::from))?;
        info!("Exported {} payments of financing {}", payments.len(), financing_id);

        Ok(ExportedStatement {
            filename: statement_filename(&financing.description, "payments", Utc::now().date_naive()),
            content,
            row_count: payments.len(),
        })
    }

    /// Materialized instances of a fixed account ordered by due date
    pub async fn export_fixed_account_instances(
        &self,
        fixed_account_id: &str,
    ) -> LedgerResult<ExportedStatement> {
        let account = self.recurrence_service.get_fixed_account(fixed_account_id).await?;
        let instances = self.recurrence_service.list_instances(fixed_account_id).await?;

        let content = render(instances.iter().map(InstanceRow::from))?;
        info!("Exported {} instances of fixed account {}", instances.len(), fixed_account_id);

        Ok(ExportedStatement {
            filename: statement_filename(&account.description, "instances", Utc::now().date_naive()),
            content,
            row_count: instances.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::domain::errors::LedgerError;
    use crate::backend::storage::sqlite::test_utils::{date, sample_account, test_db};
    use crate::backend::storage::sqlite::DbConnection;
    use crate::backend::storage::FixedAccountStorage;
    use rust_decimal_macros::dec;
    use shared::{
        ApplyPaymentRequest, CreateFinancingRequest, CreateFixedAccountRequest, EntryType,
        PayFixedAccountTransactionRequest, Periodicity,
    };

    async fn setup() -> (DbConnection, ExportService<DbConnection>) {
        let db = test_db().await;
        let service = ExportService::new(Arc::new(db.clone()));
        (db, service)
    }

    #[tokio::test]
    async fn test_export_financing_payments() {
        let (db, export) = setup().await;
        let financing_service = FinancingService::new(Arc::new(db));
        let created = financing_service
            .create_financing(CreateFinancingRequest {
                user_id: "user::alice".to_string(),
                description: "Home Laptop".to_string(),
                principal: dec!(1000),
                installment_count: 3,
                start_date: "2024-01-10".to_string(),
                periodicity: None,
            })
            .await
            .unwrap();
        financing_service
            .ledger()
            .apply_payment(ApplyPaymentRequest {
                financing_id: created.financing.id.clone(),
                installment_number: 1,
                amount: dec!(333.33),
                date: date("2024-01-10"),
                method: Some("pix".to_string()),
                accrued_interest: None,
                payment_type: None,
            })
            .await
            .unwrap();

        let statement = export.export_financing_payments(&created.financing.id).await.unwrap();

        assert_eq!(statement.row_count, 1);
        assert!(statement.filename.starts_with("home_laptop_payments_"));
        assert!(statement.filename.ends_with(".csv"));

        let mut lines = statement.content.lines();
        assert_eq!(
            lines.next(),
            Some("sequence,installment_number,payment_date,payment_type,status,amount,principal_amount,interest_amount,balance_before,balance_after,payment_method")
        );
        assert_eq!(
            lines.next(),
            Some("1,1,2024-01-10,installment,paid,333.33,333.33,0.00,1000.00,666.67,pix")
        );
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_export_fixed_account_instances() {
        let (db, export) = setup().await;
        let recurrence = RecurrenceService::new(Arc::new(db));
        let account = recurrence
            .create_fixed_account(CreateFixedAccountRequest {
                user_id: "user::alice".to_string(),
                description: "Rent".to_string(),
                amount: dec!(1500),
                periodicity: Periodicity::Monthly,
                account_type: EntryType::Expense,
                start_date: date("2024-03-01"),
                reminder_days: None,
            })
            .await
            .unwrap();
        let first = recurrence.list_instances(&account.id).await.unwrap().remove(0);
        recurrence
            .pay_instance(PayFixedAccountTransactionRequest {
                transaction_id: first.id.clone(),
                payment_date: date("2024-03-02"),
                payment_method: Some("boleto".to_string()),
                ledger_transaction_id: None,
            })
            .await
            .unwrap();

        let statement = export.export_fixed_account_instances(&account.id).await.unwrap();

        assert_eq!(statement.row_count, 1);
        assert!(statement.filename.starts_with("rent_instances_"));
        let rows: Vec<&str> = statement.content.lines().collect();
        assert_eq!(rows[0], "due_date,amount,status,payment_date,payment_method,ledger_transaction_id");
        assert_eq!(rows[1], "2024-03-01,1500.00,paid,2024-03-02,boleto,");
    }

    #[tokio::test]
    async fn test_export_missing_records() {
        let (_, export) = setup().await;

        assert!(matches!(
            export.export_financing_payments("financing::missing").await,
            Err(LedgerError::FinancingNotFound(_))
        ));
        assert!(matches!(
            export.export_fixed_account_instances("fixed_account::missing").await,
            Err(LedgerError::FixedAccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_export_empty_account_has_no_rows() {
        let (db, export) = setup().await;
        let account = sample_account(Periodicity::Weekly, "2024-01-01", dec!(20));
        db.create_fixed_account_repository()
            .store_fixed_account(&account)
            .await
            .unwrap();

        let statement = export.export_fixed_account_instances(&account.id).await.unwrap();
        assert_eq!(statement.row_count, 0);
        assert_eq!(statement.content, "");
    }

    #[test]
    fn test_statement_filename_slug() {
        assert_eq!(
            statement_filename("  Car Loan #2 ", "payments", date("2024-05-06")),
            "car_loan__2_payments_20240506.csv"
        );
    }
}
