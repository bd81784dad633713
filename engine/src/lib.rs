//! Recurring obligation and amortization ledger engine.
//!
//! Tracks installment financings through an append-only payment ledger, materializes
//! dated instances of fixed recurring accounts, and runs the scheduled maintenance
//! jobs that keep both current.

pub mod backend;
