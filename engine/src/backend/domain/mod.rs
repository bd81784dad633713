//! # Domain Module
//!
//! Business rules of the ledger engine, independent of the storage backend.
//!
//! ## Module Organization
//!
//! - **money**: rounding, currency formatting, date arithmetic, interest and balances
//! - **amortization**: installment plans for a principal over a number of installments
//! - **payment_ledger**: append-only payment log and the balance folded from it
//! - **financing_service**: financing lifecycle on top of the ledger
//! - **recurrence**: pure rollover decisions for fixed accounts
//! - **recurrence_service**: materialization and lifecycle of fixed-account instances
//! - **job_tracker**: durable execution records for scheduled jobs
//! - **export_service**: CSV statements
//!
//! ## Business Rules
//!
//! - A financing's balance never goes negative and reaches zero exactly when it is paid
//! - At most one live payment exists per installment
//! - At most one instance exists per fixed account and due date
//! - Every job run ends in exactly one final state

pub mod amortization;
pub mod errors;
pub mod export_service;
pub mod financing_service;
pub mod job_tracker;
pub mod money;
pub mod payment_ledger;
pub mod recurrence;
pub mod recurrence_service;

pub use errors::{LedgerError, LedgerResult};
pub use export_service::*;
pub use financing_service::*;
pub use job_tracker::*;
pub use payment_ledger::PaymentLedgerService;
pub use recurrence_service::*;
