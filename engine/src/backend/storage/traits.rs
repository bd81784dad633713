//! # Storage Traits
//!
//! Storage abstraction used by the domain layer. Each record family gets its own
//! trait; a [`Connection`] hands out concrete repositories so services can be written
//! once and run against any backend.
//!
//! The uniqueness guarantees the engine relies on for concurrency live behind these
//! traits: append and materialize operations report a lost race through their return
//! value rather than an error.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    AuditEntry, Financing, FinancingPayment, FinancingStatus, FixedAccount,
    FixedAccountTransaction, JobExecution, Notification, PaymentStatus,
};

/// Result of appending an entry to a financing's payment log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A non-cancelled entry for the same installment already exists
    DuplicateInstallment,
    /// Another entry took this log position first
    StaleSequence,
}

/// Whether an upsert inserted a new row or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Rollover of an account to its next cycle.
///
/// Applied only while the stored account is still active and still on `from_due_date`,
/// so a writer holding an old copy of the account cannot undo a deactivation or move
/// the due date backwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleAdvance {
    pub fixed_account_id: String,
    pub from_due_date: NaiveDate,
    pub to_due_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

/// Result of materializing a fixed-account instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeWrite {
    /// The instance was inserted and the requested advance applied
    Created,
    /// An instance for that due date already existed. `account_advanced` is true when the
    /// account was still behind it and has been moved up to it.
    InstanceExists { account_advanced: bool },
    /// The account was deactivated or rolled over by another writer; nothing was written
    AccountMoved,
}

/// Trait defining the interface for financing storage operations
#[async_trait]
pub trait FinancingStorage: Send + Sync {
    /// Store a new financing
    async fn store_financing(&self, financing: &Financing) -> Result<()>;

    /// Retrieve a financing by ID
    async fn get_financing(&self, financing_id: &str) -> Result<Option<Financing>>;

    /// List financings in a given status, oldest first
    async fn list_financings_by_status(&self, status: FinancingStatus) -> Result<Vec<Financing>>;

    /// Change the status of a financing
    /// Returns false when the financing does not exist
    async fn update_financing_status(
        &self,
        financing_id: &str,
        status: FinancingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Trait defining the interface for the append-only financing payment log
#[async_trait]
pub trait FinancingPaymentStorage: Send + Sync {
    /// All entries of a financing in log order (sequence ascending)
    async fn list_payments(&self, financing_id: &str) -> Result<Vec<FinancingPayment>>;

    /// Append an entry to the log.
    ///
    /// When `settles_financing` is set the financing is switched to paid in the same
    /// transaction. Nothing is written unless the outcome is `Appended`.
    async fn append_payment(
        &self,
        payment: &FinancingPayment,
        settles_financing: bool,
    ) -> Result<AppendOutcome>;
}

/// Trait defining the interface for fixed account storage operations
#[async_trait]
pub trait FixedAccountStorage: Send + Sync {
    async fn store_fixed_account(&self, account: &FixedAccount) -> Result<()>;

    /// Store a new account together with the instance of its first cycle, atomically
    async fn open_fixed_account(
        &self,
        account: &FixedAccount,
        first_instance: &FixedAccountTransaction,
    ) -> Result<()>;

    async fn get_fixed_account(&self, fixed_account_id: &str) -> Result<Option<FixedAccount>>;

    /// All active accounts across users, ordered by next due date
    async fn list_active_fixed_accounts(&self) -> Result<Vec<FixedAccount>>;

    async fn list_fixed_accounts(&self, user_id: &str) -> Result<Vec<FixedAccount>>;

    /// Flag the cycle due on `due_date` as paid. Returns false when the account has
    /// already moved to another cycle.
    async fn mark_cycle_paid(
        &self,
        fixed_account_id: &str,
        due_date: NaiveDate,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Switch an active account off. Returns false when it was not active.
    async fn deactivate_fixed_account(
        &self,
        fixed_account_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Trait defining the interface for fixed account instance storage operations
#[async_trait]
pub trait FixedAccountTransactionStorage: Send + Sync {
    /// Insert an instance unless one already exists for its (account, due date).
    ///
    /// With an `advance`, the account is rolled forward in the same transaction. When the
    /// advance no longer applies to the stored account the insert is rolled back.
    async fn materialize_instance(
        &self,
        instance: &FixedAccountTransaction,
        advance: Option<&CycleAdvance>,
    ) -> Result<MaterializeWrite>;

    async fn get_instance(&self, transaction_id: &str) -> Result<Option<FixedAccountTransaction>>;

    async fn find_instance(
        &self,
        fixed_account_id: &str,
        due_date: NaiveDate,
    ) -> Result<Option<FixedAccountTransaction>>;

    /// Instances of one account ordered by due date
    async fn list_instances(&self, fixed_account_id: &str) -> Result<Vec<FixedAccountTransaction>>;

    /// Instances in a status across all accounts, ordered by due date
    async fn list_instances_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<FixedAccountTransaction>>;

    /// Persist status and settlement fields of an instance
    async fn update_instance(&self, instance: &FixedAccountTransaction) -> Result<()>;

    /// Flip every pending instance due before `today` to overdue and return them
    async fn mark_overdue_before(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<FixedAccountTransaction>>;
}

/// Trait defining the interface for job execution records
#[async_trait]
pub trait JobExecutionStorage: Send + Sync {
    /// Insert the row for a run that is about to start
    async fn start_execution(&self, execution: &JobExecution) -> Result<()>;

    /// Write the final state of a run.
    /// Only a row that is still running is touched; returns false otherwise.
    async fn finalize_execution(&self, execution: &JobExecution) -> Result<bool>;

    async fn get_execution(&self, execution_id: &str) -> Result<Option<JobExecution>>;

    /// Most recent runs of a job, newest first
    async fn list_executions(&self, job_name: &str, limit: u32) -> Result<Vec<JobExecution>>;

    /// Latest successful run of a job that started at or after `since`
    async fn latest_success_since(
        &self,
        job_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<JobExecution>>;

    /// Runs still marked running that started before `cutoff`
    async fn list_running_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobExecution>>;

    /// Delete finished runs that started before `cutoff`, returning how many went
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Trait defining the interface for the notification producer
#[async_trait]
pub trait NotificationStorage: Send + Sync {
    /// Insert, or refresh the existing notification for the same
    /// (user, kind, related entity)
    async fn upsert_notification(&self, notification: &Notification) -> Result<UpsertOutcome>;

    /// Notifications for a user, newest first
    async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, notification_id: &str) -> Result<bool>;

    /// Delete read notifications last touched before `cutoff`
    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Write-only audit sink
#[async_trait]
pub trait AuditStorage: Send + Sync {
    async fn record_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Most recent entries, newest first
    async fn list_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>>;
}

/// Trait defining the interface for storage connections
///
/// Abstracts the concrete connection type and provides factory methods for
/// repositories, so the domain layer never names a backend.
pub trait Connection: Send + Sync + Clone + 'static {
    type FinancingRepository: FinancingStorage + Clone;
    type FinancingPaymentRepository: FinancingPaymentStorage + Clone;
    type FixedAccountRepository: FixedAccountStorage + Clone;
    type FixedAccountTransactionRepository: FixedAccountTransactionStorage + Clone;
    type JobExecutionRepository: JobExecutionStorage + Clone;
    type NotificationRepository: NotificationStorage + Clone;
    type AuditRepository: AuditStorage + Clone;

    fn create_financing_repository(&self) -> Self::FinancingRepository;
    fn create_financing_payment_repository(&self) -> Self::FinancingPaymentRepository;
    fn create_fixed_account_repository(&self) -> Self::FixedAccountRepository;
    fn create_fixed_account_transaction_repository(&self) -> Self::FixedAccountTransactionRepository;
    fn create_job_execution_repository(&self) -> Self::JobExecutionRepository;
    fn create_notification_repository(&self) -> Self::NotificationRepository;
    fn create_audit_repository(&self) -> Self::AuditRepository;
}
