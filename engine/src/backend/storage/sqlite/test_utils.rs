//! Fixture builders shared by repository and service tests.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    EntryType, Financing, FinancingPayment, FinancingStatus, FixedAccount, PaymentStatus,
    PaymentType, Periodicity,
};

use super::connection::DbConnection;

pub async fn test_db() -> DbConnection {
    DbConnection::init_test()
        .await
        .expect("Failed to create test database")
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("fixture date")
}

pub fn sample_financing(principal: Decimal, installment_count: u32, start: &str) -> Financing {
    let now = Utc::now();
    Financing {
        id: Financing::generate_id(),
        user_id: "user::alice".to_string(),
        description: "Laptop".to_string(),
        principal,
        installment_count,
        start_date: date(start),
        periodicity: Periodicity::Monthly,
        status: FinancingStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

/// Ledger entry with no interest component
pub fn sample_payment(
    financing: &Financing,
    installment_number: u32,
    sequence: u32,
    amount: Decimal,
    balance_before: Decimal,
) -> FinancingPayment {
    FinancingPayment {
        id: FinancingPayment::generate_id(),
        user_id: financing.user_id.clone(),
        financing_id: financing.id.clone(),
        installment_number,
        sequence,
        amount,
        principal_amount: amount,
        interest_amount: Decimal::ZERO,
        balance_before,
        balance_after: balance_before - amount,
        payment_type: PaymentType::Installment,
        status: PaymentStatus::Paid,
        payment_date: financing.start_date,
        payment_method: Some("pix".to_string()),
        created_at: Utc::now(),
    }
}

pub fn sample_account(periodicity: Periodicity, start: &str, amount: Decimal) -> FixedAccount {
    let now = Utc::now();
    FixedAccount {
        id: FixedAccount::generate_id(),
        user_id: "user::alice".to_string(),
        description: "Rent".to_string(),
        amount,
        periodicity,
        account_type: EntryType::Expense,
        start_date: date(start),
        next_due_date: date(start),
        is_active: true,
        is_paid: false,
        reminder_days: 3,
        created_at: now,
        updated_at: now,
    }
}
