//! Housekeeping: closes out runs left `running` by a crashed process and purges read
//! notifications and finished executions past their retention window.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;

use super::ScheduledJob;
use crate::backend::domain::{JobOutcome, JobTracker};
use crate::backend::storage::{Connection, JobExecutionStorage, NotificationStorage};

pub const CLEANUP_JOB: &str = "cleanup";

/// Age thresholds for the cleanup pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub stale_after: Duration,
    pub notification_retention: Duration,
    pub execution_retention: Duration,
}

pub struct CleanupJob<C: Connection> {
    tracker: JobTracker<C>,
    notification_repository: C::NotificationRepository,
    execution_repository: C::JobExecutionRepository,
    policy: RetentionPolicy,
}

impl<C: Connection> CleanupJob<C> {
    pub fn new(connection: Arc<C>, policy: RetentionPolicy) -> Self {
        Self {
            tracker: JobTracker::new(connection.clone()),
            notification_repository: connection.create_notification_repository(),
            execution_repository: connection.create_job_execution_repository(),
            policy,
        }
    }
}

#[async_trait]
impl<C: Connection> ScheduledJob for CleanupJob<C> {
    fn name(&self) -> &'static str {
        CLEANUP_JOB
    }

    async fn run(&self, _today: NaiveDate) -> anyhow::Result<JobOutcome> {
        let now = Utc::now();

        let reconciled = self.tracker.reconcile_stale(self.policy.stale_after).await?;
        let notifications_purged = self
            .notification_repository
            .delete_read_before(now - self.policy.notification_retention)
            .await?;
        let executions_purged = self
            .execution_repository
            .delete_finished_before(now - self.policy.execution_retention)
            .await?;

        info!(
            "Cleanup: {} stale runs reconciled, {} notifications and {} executions purged",
            reconciled.len(),
            notifications_purged,
            executions_purged
        );
        Ok(JobOutcome::default()
            .with_metadata("stale_executions_reconciled", reconciled.len())
            .with_metadata("notifications_purged", notifications_purged)
            .with_metadata("executions_purged", executions_purged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::sqlite::test_utils::test_db;
    use serde_json::Value;
    use shared::{JobExecution, JobStatus, Notification, NotificationKind, RelatedEntity};

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            stale_after: Duration::hours(2),
            notification_retention: Duration::days(90),
            execution_retention: Duration::days(30),
        }
    }

    fn execution(status: JobStatus, started_at: chrono::DateTime<Utc>) -> JobExecution {
        let finished = (status != JobStatus::Running).then(|| started_at + Duration::seconds(1));
        JobExecution {
            id: JobExecution::generate_id(),
            job_name: "reminders".to_string(),
            status,
            started_at,
            finished_at: finished,
            duration_ms: finished.map(|_| 1000),
            notifications_created: 0,
            notifications_updated: 0,
            error_message: None,
            error_stack: None,
            metadata: Value::Object(Default::default()),
        }
    }

    #[tokio::test]
    async fn test_cleanup_reconciles_and_purges() {
        let db = test_db().await;
        let executions = db.create_job_execution_repository();
        let notifications = db.create_notification_repository();

        let crashed = execution(JobStatus::Running, Utc::now() - Duration::hours(5));
        let in_flight = execution(JobStatus::Running, Utc::now() - Duration::minutes(5));
        let ancient = execution(JobStatus::Success, Utc::now() - Duration::days(60));
        let recent = execution(JobStatus::Success, Utc::now() - Duration::days(1));
        for record in [&crashed, &in_flight, &ancient, &recent] {
            executions.start_execution(record).await.unwrap();
        }

        let old = Utc::now() - Duration::days(120);
        let read_notice = Notification {
            id: Notification::generate_id(),
            user_id: "user::alice".to_string(),
            kind: NotificationKind::PaymentDue,
            title: "Payment due soon".to_string(),
            message: "Rent".to_string(),
            related: Some(RelatedEntity::FixedAccount {
                fixed_account_id: "fixed_account::rent".to_string(),
            }),
            is_read: false,
            created_at: old,
            updated_at: old,
        };
        notifications.upsert_notification(&read_notice).await.unwrap();
        notifications.mark_notification_read(&read_notice.id).await.unwrap();

        let job = CleanupJob::new(Arc::new(db.clone()), policy());
        let outcome = job.run(Utc::now().date_naive()).await.unwrap();

        assert_eq!(outcome.metadata["stale_executions_reconciled"], 1);
        assert_eq!(outcome.metadata["notifications_purged"], 1);
        assert_eq!(outcome.metadata["executions_purged"], 1);

        let crashed = executions.get_execution(&crashed.id).await.unwrap().unwrap();
        assert_eq!(crashed.status, JobStatus::Error);
        let in_flight = executions.get_execution(&in_flight.id).await.unwrap().unwrap();
        assert_eq!(in_flight.status, JobStatus::Running);
        assert!(executions.get_execution(&ancient.id).await.unwrap().is_none());
        assert!(executions.get_execution(&recent.id).await.unwrap().is_some());
        assert!(notifications.list_notifications("user::alice").await.unwrap().is_empty());
    }
}
