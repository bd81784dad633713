//! # Backend Module
//!
//! Wires storage, domain services and scheduled jobs together for the engine daemon.
//!
//! ## Module Organization
//!
//! - **config**: YAML engine settings
//! - **domain**: ledger rules and services
//! - **jobs**: scheduled maintenance routines and their scheduler
//! - **storage**: storage traits and the SQLite implementation

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub mod config;
pub mod domain;
pub mod jobs;
pub mod storage;

use config::EngineConfig;
use domain::{ExportService, FinancingService, JobTracker, RecurrenceService};
use jobs::cleanup::RetentionPolicy;
use jobs::{CleanupJob, PaymentCheckJob, RecurrenceRolloverJob, RemindersJob, Scheduler};
use storage::sqlite::DbConnection;

/// Services shared by the daemon
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<DbConnection>,
    pub financing_service: FinancingService<DbConnection>,
    pub recurrence_service: RecurrenceService<DbConnection>,
    pub job_tracker: JobTracker<DbConnection>,
    pub export_service: ExportService<DbConnection>,
}

/// Open the database and build every service on top of it
pub async fn initialize_backend(config: &EngineConfig) -> Result<AppState> {
    info!("Setting up database at {}", config.database_url);
    let connection = Arc::new(DbConnection::new(&config.database_url).await?);
    Ok(build_state(connection))
}

fn build_state(connection: Arc<DbConnection>) -> AppState {
    info!("Setting up domain services");
    AppState {
        financing_service: FinancingService::new(connection.clone()),
        recurrence_service: RecurrenceService::new(connection.clone()),
        job_tracker: JobTracker::new(connection.clone()),
        export_service: ExportService::new(connection.clone()),
        connection,
    }
}

/// Register the maintenance jobs at their configured intervals
pub fn build_scheduler(state: &AppState, config: &EngineConfig) -> Scheduler<DbConnection> {
    let connection = state.connection.clone();
    let policy = RetentionPolicy {
        stale_after: config.stale_after(),
        notification_retention: config.notification_retention(),
        execution_retention: config.execution_retention(),
    };

    Scheduler::new(connection.clone())
        .register(
            Arc::new(RecurrenceRolloverJob::new(connection.clone())),
            config.jobs.recurrence_rollover(),
        )
        .register(
            Arc::new(PaymentCheckJob::new(connection.clone(), config.currency.clone())),
            config.jobs.payment_check(),
        )
        .register(
            Arc::new(RemindersJob::new(connection.clone(), config.currency.clone())),
            config.jobs.reminders(),
        )
        .register(Arc::new(CleanupJob::new(connection, policy)), config.jobs.cleanup())
}
