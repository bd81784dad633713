//! # SQLite Storage Module
//!
//! sqlx-backed implementation of the storage traits. One repository per record
//! family, all sharing a single [`DbConnection`] pool.
//!
//! The schema carries the uniqueness constraints the engine depends on:
//!
//! - `financing_payments (financing_id, installment_number)` among non-cancelled rows
//! - `financing_payments (financing_id, sequence)`
//! - `fixed_account_transactions (fixed_account_id, due_date)`
//! - `notifications (user_id, kind, related_kind, related_id)`

mod columns;
pub mod connection;
pub mod audit_repository;
pub mod financing_payment_repository;
pub mod financing_repository;
pub mod fixed_account_repository;
pub mod fixed_account_transaction_repository;
pub mod job_execution_repository;
pub mod notification_repository;

#[cfg(test)]
pub mod test_utils;

pub use audit_repository::AuditRepository;
pub use connection::{DbConnection, DEFAULT_DATABASE_URL};
pub use financing_payment_repository::FinancingPaymentRepository;
pub use financing_repository::FinancingRepository;
pub use fixed_account_repository::FixedAccountRepository;
pub use fixed_account_transaction_repository::FixedAccountTransactionRepository;
pub use job_execution_repository::JobExecutionRepository;
pub use notification_repository::NotificationRepository;
