//! Failure kinds for ledger-mutating operations.
//!
//! Best-effort helpers (money formatting, schedule previews) never produce these;
//! they return zero or empty values instead.

use rust_decimal::Decimal;
use shared::PaymentStatus;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error(
        "Installment count must be between 1 and {}",
        crate::backend::domain::amortization::MAX_INSTALLMENTS
    )]
    InvalidTerm,
    #[error("Invalid ISO date: {0}")]
    InvalidDate(String),
    #[error("Installment {number} is outside the schedule of {count} installments")]
    InvalidInstallment { number: u32, count: u32 },
    #[error("Installment {installment_number} of financing {financing_id} already has a payment")]
    DuplicateInstallment {
        financing_id: String,
        installment_number: u32,
    },
    #[error("Payment does not fit the outstanding balance of {balance}: {reason}")]
    InsufficientAmount { balance: Decimal, reason: String },
    #[error("Instance {transaction_id} cannot become overdue: {reason}")]
    OverdueConflict {
        transaction_id: String,
        reason: String,
    },
    #[error("Cannot move instance {transaction_id} from {from} to {to}")]
    InvalidStatusTransition {
        transaction_id: String,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("Ledger for financing {0} changed while the payment was being applied")]
    ConcurrentUpdate(String),
    #[error("Financing not found: {0}")]
    FinancingNotFound(String),
    #[error("Financing {0} is not active")]
    FinancingNotActive(String),
    #[error("Fixed account not found: {0}")]
    FixedAccountNotFound(String),
    #[error("Fixed account {0} is not active")]
    FixedAccountInactive(String),
    #[error("Fixed account instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Job execution {0} was already finalized")]
    AlreadyFinalized(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
