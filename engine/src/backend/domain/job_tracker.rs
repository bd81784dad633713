//! Durable execution records for scheduled jobs.
//!
//! Every run is written as `running` before the job body starts and finalized exactly
//! once afterwards. Job failures, panics included, end up in the record instead of
//! propagating to the scheduler.

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde_json::Value;
use shared::{AuditEntry, AuditOutcome, JobExecution, JobStatus};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::domain::errors::{LedgerError, LedgerResult};
use crate::backend::storage::{AuditStorage, Connection, JobExecutionStorage, UpsertOutcome};

const SCHEDULER_ACTOR: &str = "scheduler";

/// What a successful job run reports back
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub notifications_created: u32,
    pub notifications_updated: u32,
    pub metadata: Value,
}

impl Default for JobOutcome {
    fn default() -> Self {
        Self {
            notifications_created: 0,
            notifications_updated: 0,
            metadata: Value::Object(Default::default()),
        }
    }
}

impl JobOutcome {
    /// Count one notification write
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.notifications_created += 1,
            UpsertOutcome::Updated => self.notifications_updated += 1,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// Result of a run gated on the current cycle
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// The job ran; the record holds its final status
    Completed(JobExecution),
    /// A successful run already happened in this cycle
    Skipped { last_success: JobExecution },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Finish time that is strictly after the start even on coarse clocks
fn finish_time(started_at: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    let earliest = started_at + Duration::microseconds(1);
    if now < earliest {
        earliest
    } else {
        now
    }
}

#[derive(Clone)]
pub struct JobTracker<C: Connection> {
    execution_repository: C::JobExecutionRepository,
    audit_repository: C::AuditRepository,
}

impl<C: Connection> JobTracker<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            execution_repository: connection.create_job_execution_repository(),
            audit_repository: connection.create_audit_repository(),
        }
    }

    /// Run `job` under a durable execution record.
    ///
    /// Only storage failures of the record itself are returned as errors; a failing or
    /// panicking job yields `Ok` with an `error` record.
    pub async fn run_tracked<F, Fut>(&self, job_name: &str, job: F) -> LedgerResult<JobExecution>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<JobOutcome>>,
    {
        let mut execution = JobExecution {
            id: JobExecution::generate_id(),
            job_name: job_name.to_string(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            notifications_created: 0,
            notifications_updated: 0,
            error_message: None,
            error_stack: None,
            metadata: Value::Object(Default::default()),
        };
        self.execution_repository.start_execution(&execution).await?;
        info!("Started job {} ({})", job_name, execution.id);

        let result = AssertUnwindSafe(async move { job().await }).catch_unwind().await;

        let finished_at = finish_time(execution.started_at);
        execution.finished_at = Some(finished_at);
        execution.duration_ms = Some((finished_at - execution.started_at).num_milliseconds());

        match result {
            Ok(Ok(outcome)) => {
                execution.status = JobStatus::Success;
                execution.notifications_created = outcome.notifications_created;
                execution.notifications_updated = outcome.notifications_updated;
                execution.metadata = outcome.metadata;
                info!(
                    "Job {} succeeded in {}ms ({} created, {} updated)",
                    job_name,
                    execution.duration_ms.unwrap_or_default(),
                    execution.notifications_created,
                    execution.notifications_updated
                );
            }
            Ok(Err(e)) => {
                execution.status = JobStatus::Error;
                execution.error_message = Some(format!("{:#}", e));
                execution.error_stack = Some(format!("{:?}", e));
                error!("Job {} failed: {:#}", job_name, e);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                execution.status = JobStatus::Error;
                execution.error_message = Some(format!("job panicked: {}", message));
                execution.error_stack = Some(format!("panic in job {}: {}", job_name, message));
                error!("Job {} panicked: {}", job_name, message);
            }
        }

        self.finalize(&execution).await?;
        Ok(execution)
    }

    /// Run `job` unless it already succeeded at or after `cycle_start`
    pub async fn run_once_per_cycle<F, Fut>(
        &self,
        job_name: &str,
        cycle_start: DateTime<Utc>,
        job: F,
    ) -> LedgerResult<JobResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<JobOutcome>>,
    {
        if let Some(last_success) = self
            .execution_repository
            .latest_success_since(job_name, cycle_start)
            .await?
        {
            info!(
                "Skipping job {}: already succeeded this cycle ({})",
                job_name, last_success.id
            );
            return Ok(JobResult::Skipped { last_success });
        }

        Ok(JobResult::Completed(self.run_tracked(job_name, job).await?))
    }

    /// Write the final state of a run; a record can only be finalized once
    pub async fn finalize(&self, execution: &JobExecution) -> LedgerResult<()> {
        if !self.execution_repository.finalize_execution(execution).await? {
            return Err(LedgerError::AlreadyFinalized(execution.id.clone()));
        }

        let outcome = match execution.status {
            JobStatus::Success => AuditOutcome::Success,
            _ => AuditOutcome::Failure,
        };
        let detail = match &execution.error_message {
            Some(message) => format!("{} {}: {}", execution.job_name, execution.status.as_str(), message),
            None => format!("{} {}", execution.job_name, execution.status.as_str()),
        };
        let entry = AuditEntry::new(SCHEDULER_ACTOR, "job.finalize", &execution.id, outcome).with_detail(detail);
        if let Err(e) = self.audit_repository.record_audit(&entry).await {
            warn!("Failed to audit job execution {}: {}", execution.id, e);
        }
        Ok(())
    }

    /// Close out runs left `running` for longer than `older_than`, which only happens
    /// when the process died mid-job
    pub async fn reconcile_stale(&self, older_than: Duration) -> LedgerResult<Vec<JobExecution>> {
        let cutoff = Utc::now() - older_than;
        let stale = self
            .execution_repository
            .list_running_started_before(cutoff)
            .await?;

        let mut reconciled = Vec::new();
        for mut execution in stale {
            let finished_at = finish_time(execution.started_at);
            execution.status = JobStatus::Error;
            execution.finished_at = Some(finished_at);
            execution.duration_ms = Some((finished_at - execution.started_at).num_milliseconds());
            execution.error_message = Some("presumed crashed: still running past the stale threshold".to_string());

            match self.finalize(&execution).await {
                Ok(()) => {
                    warn!("Reconciled stale job {} ({})", execution.job_name, execution.id);
                    reconciled.push(execution);
                }
                Err(LedgerError::AlreadyFinalized(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reconciled)
    }

    /// Most recent runs of a job, newest first
    pub async fn history(&self, job_name: &str, limit: u32) -> LedgerResult<Vec<JobExecution>> {
        Ok(self.execution_repository.list_executions(job_name, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::sqlite::test_utils::test_db;
    use crate::backend::storage::sqlite::DbConnection;
    use anyhow::{anyhow, Context};

    async fn setup() -> (DbConnection, JobTracker<DbConnection>) {
        let db = test_db().await;
        let tracker = JobTracker::new(Arc::new(db.clone()));
        (db, tracker)
    }

    #[tokio::test]
    async fn test_successful_job_is_recorded() {
        let (db, tracker) = setup().await;

        let execution = tracker
            .run_tracked("reminders", || async {
                let mut outcome = JobOutcome::default().with_metadata("accounts", 4);
                outcome.record(UpsertOutcome::Created);
                outcome.record(UpsertOutcome::Created);
                outcome.record(UpsertOutcome::Updated);
                Ok(outcome)
            })
            .await
            .unwrap();

        assert_eq!(execution.status, JobStatus::Success);
        assert_eq!(execution.notifications_created, 2);
        assert_eq!(execution.notifications_updated, 1);

        let stored = db
            .create_job_execution_repository()
            .get_execution(&execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.metadata["accounts"], 4);
        assert!(stored.finished_at.unwrap() > stored.started_at);
    }

    #[tokio::test]
    async fn test_failing_job_is_recorded_not_propagated() {
        let (db, tracker) = setup().await;

        let execution = tracker
            .run_tracked("payment_check", || async {
                Err::<JobOutcome, _>(anyhow!("connection reset")).context("loading overdue instances")
            })
            .await
            .expect("job failure must not propagate");

        assert_eq!(execution.status, JobStatus::Error);
        let stored = db
            .create_job_execution_repository()
            .get_execution(&execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("loading overdue instances: connection reset")
        );
        assert!(stored.error_stack.unwrap().contains("connection reset"));
        assert!(stored.finished_at.unwrap() > stored.started_at);
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded() {
        let (_, tracker) = setup().await;

        let execution = tracker
            .run_tracked("cleanup", || async {
                if true {
                    panic!("boom");
                }
                Ok(JobOutcome::default())
            })
            .await
            .unwrap();

        assert_eq!(execution.status, JobStatus::Error);
        assert_eq!(execution.error_message.as_deref(), Some("job panicked: boom"));
    }

    #[tokio::test]
    async fn test_finalize_happens_once() {
        let (_, tracker) = setup().await;
        let execution = tracker
            .run_tracked("reminders", || async { Ok(JobOutcome::default()) })
            .await
            .unwrap();

        assert!(matches!(
            tracker.finalize(&execution).await,
            Err(LedgerError::AlreadyFinalized(_))
        ));
    }

    #[tokio::test]
    async fn test_every_finalization_is_audited() {
        let (db, tracker) = setup().await;
        tracker
            .run_tracked("reminders", || async { Ok(JobOutcome::default()) })
            .await
            .unwrap();
        tracker
            .run_tracked("reminders", || async { Err(anyhow!("smtp down")) })
            .await
            .unwrap();

        let audit = db.create_audit_repository().list_audit_entries(10).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|entry| entry.actor == "scheduler"));
        assert_eq!(audit[0].outcome, AuditOutcome::Failure);
        assert!(audit[0].detail.as_deref().unwrap().contains("smtp down"));
        assert_eq!(audit[1].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_run_once_per_cycle_skips_after_success() {
        let (_, tracker) = setup().await;
        let cycle_start = Utc::now() - Duration::minutes(10);

        let first = tracker
            .run_once_per_cycle("recurrence_rollover", cycle_start, || async { Ok(JobOutcome::default()) })
            .await
            .unwrap();
        let JobResult::Completed(first) = first else {
            panic!("first run must execute");
        };

        let mut ran = false;
        let second = tracker
            .run_once_per_cycle("recurrence_rollover", cycle_start, || {
                ran = true;
                async { Ok(JobOutcome::default()) }
            })
            .await
            .unwrap();
        assert!(!ran);
        assert!(matches!(second, JobResult::Skipped { ref last_success } if last_success.id == first.id));
        assert_eq!(tracker.history("recurrence_rollover", 5).await.unwrap().len(), 1);

        // The next cycle runs again
        let third = tracker
            .run_once_per_cycle("recurrence_rollover", Utc::now(), || async { Ok(JobOutcome::default()) })
            .await
            .unwrap();
        assert!(matches!(third, JobResult::Completed(_)));
    }

    #[tokio::test]
    async fn test_failed_run_does_not_satisfy_cycle() {
        let (_, tracker) = setup().await;
        let cycle_start = Utc::now() - Duration::minutes(1);

        tracker
            .run_once_per_cycle("cleanup", cycle_start, || async { Err(anyhow!("disk full")) })
            .await
            .unwrap();
        let retry = tracker
            .run_once_per_cycle("cleanup", cycle_start, || async { Ok(JobOutcome::default()) })
            .await
            .unwrap();
        assert!(matches!(retry, JobResult::Completed(ref e) if e.status == JobStatus::Success));
    }

    #[tokio::test]
    async fn test_reconcile_stale_runs() {
        let (db, tracker) = setup().await;
        let repo = db.create_job_execution_repository();

        let stale = JobExecution {
            id: JobExecution::generate_id(),
            job_name: "payment_check".to_string(),
            status: JobStatus::Running,
            started_at: Utc::now() - Duration::hours(2),
            finished_at: None,
            duration_ms: None,
            notifications_created: 0,
            notifications_updated: 0,
            error_message: None,
            error_stack: None,
            metadata: Value::Object(Default::default()),
        };
        repo.start_execution(&stale).await.unwrap();

        let reconciled = tracker.reconcile_stale(Duration::minutes(30)).await.unwrap();
        assert_eq!(reconciled.len(), 1);

        let stored = repo.get_execution(&stale.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Error);
        assert!(stored.error_message.unwrap().starts_with("presumed crashed"));
        assert!(stored.finished_at.unwrap() > stored.started_at);

        assert!(tracker.reconcile_stale(Duration::minutes(30)).await.unwrap().is_empty());
    }
}
