use anyhow::Result;
use sqlx::migrate::MigrateDatabase;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::info;

use super::{
    AuditRepository, FinancingPaymentRepository, FinancingRepository, FixedAccountRepository,
    FixedAccountTransactionRepository, JobExecutionRepository, NotificationRepository,
};
use crate::backend::storage::traits::Connection;

/// Default database used when no configuration overrides it
pub const DEFAULT_DATABASE_URL: &str = "sqlite:ledger-engine.db";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS financings (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        description TEXT NOT NULL,
        principal TEXT NOT NULL,
        installment_count INTEGER NOT NULL,
        start_date TEXT NOT NULL,
        periodicity TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS financing_payments (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        financing_id TEXT NOT NULL REFERENCES financings(id),
        installment_number INTEGER NOT NULL,
        sequence INTEGER NOT NULL,
        amount TEXT NOT NULL,
        principal_amount TEXT NOT NULL,
        interest_amount TEXT NOT NULL,
        balance_before TEXT NOT NULL,
        balance_after TEXT NOT NULL,
        payment_type TEXT NOT NULL,
        status TEXT NOT NULL,
        payment_date TEXT NOT NULL,
        payment_method TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (financing_id, sequence)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_financing_payments_installment
        ON financing_payments (financing_id, installment_number)
        WHERE status != 'cancelled'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fixed_accounts (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        description TEXT NOT NULL,
        amount TEXT NOT NULL,
        periodicity TEXT NOT NULL,
        account_type TEXT NOT NULL,
        start_date TEXT NOT NULL,
        next_due_date TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        is_paid INTEGER NOT NULL,
        reminder_days INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fixed_account_transactions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        fixed_account_id TEXT NOT NULL REFERENCES fixed_accounts(id),
        due_date TEXT NOT NULL,
        amount TEXT NOT NULL,
        status TEXT NOT NULL,
        payment_date TEXT,
        payment_method TEXT,
        ledger_transaction_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (fixed_account_id, due_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_executions (
        id TEXT PRIMARY KEY,
        job_name TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        duration_ms INTEGER,
        notifications_created INTEGER NOT NULL DEFAULT 0,
        notifications_updated INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        error_stack TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_job_executions_name_started
        ON job_executions (job_name, started_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        related_kind TEXT NOT NULL DEFAULT '',
        related_id TEXT NOT NULL DEFAULT '',
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (user_id, kind, related_kind, related_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        actor TEXT NOT NULL,
        action TEXT NOT NULL,
        resource TEXT NOT NULL,
        outcome TEXT NOT NULL,
        detail TEXT,
        recorded_at TEXT NOT NULL
    )
    "#,
];

/// DbConnection manages the SQLite pool shared by every repository
#[derive(Clone)]
pub struct DbConnection {
    pool: Arc<SqlitePool>,
}

impl DbConnection {
    /// Open (creating if needed) the database at `url` and make sure the schema exists
    pub async fn new(url: &str) -> Result<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            info!("Creating database {}", url);
            Sqlite::create_database(url).await?
        }

        let pool = SqlitePool::connect(url).await?;
        Self::setup_schema(&pool).await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Open the default database
    pub async fn init() -> Result<Self> {
        Self::new(DEFAULT_DATABASE_URL).await
    }

    /// Fresh in-memory database.
    ///
    /// A single connection that never recycles keeps the database alive for the whole
    /// test; dropping the pool discards it.
    #[cfg(test)]
    pub async fn init_test() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::setup_schema(&pool).await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    /// Get the underlying SQLite pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Connection for DbConnection {
    type FinancingRepository = FinancingRepository;
    type FinancingPaymentRepository = FinancingPaymentRepository;
    type FixedAccountRepository = FixedAccountRepository;
    type FixedAccountTransactionRepository = FixedAccountTransactionRepository;
    type JobExecutionRepository = JobExecutionRepository;
    type NotificationRepository = NotificationRepository;
    type AuditRepository = AuditRepository;

    fn create_financing_repository(&self) -> Self::FinancingRepository {
        FinancingRepository::new(self.clone())
    }

    fn create_financing_payment_repository(&self) -> Self::FinancingPaymentRepository {
        FinancingPaymentRepository::new(self.clone())
    }

    fn create_fixed_account_repository(&self) -> Self::FixedAccountRepository {
        FixedAccountRepository::new(self.clone())
    }

    fn create_fixed_account_transaction_repository(&self) -> Self::FixedAccountTransactionRepository {
        FixedAccountTransactionRepository::new(self.clone())
    }

    fn create_job_execution_repository(&self) -> Self::JobExecutionRepository {
        JobExecutionRepository::new(self.clone())
    }

    fn create_notification_repository(&self) -> Self::NotificationRepository {
        NotificationRepository::new(self.clone())
    }

    fn create_audit_repository(&self) -> Self::AuditRepository {
        AuditRepository::new(self.clone())
    }
}
