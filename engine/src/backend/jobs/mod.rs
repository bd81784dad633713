//! # Scheduled Jobs
//!
//! Periodic maintenance routines run by the [`scheduler::Scheduler`]. Each job reports a
//! [`JobOutcome`] that the job tracker persists with the execution record.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use shared::{Notification, NotificationKind, RelatedEntity};

use crate::backend::domain::JobOutcome;

pub mod cleanup;
pub mod payment_check;
pub mod recurrence_rollover;
pub mod reminders;
pub mod scheduler;

pub use cleanup::CleanupJob;
pub use payment_check::PaymentCheckJob;
pub use recurrence_rollover::RecurrenceRolloverJob;
pub use reminders::RemindersJob;
pub use scheduler::Scheduler;

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable name used for execution records
    fn name(&self) -> &'static str;

    async fn run(&self, today: NaiveDate) -> anyhow::Result<JobOutcome>;
}

/// Unread notification stamped now
pub(crate) fn new_notification(
    user_id: &str,
    kind: NotificationKind,
    title: impl Into<String>,
    message: impl Into<String>,
    related: RelatedEntity,
) -> Notification {
    let now = Utc::now();
    Notification {
        id: Notification::generate_id(),
        user_id: user_id.to_string(),
        kind,
        title: title.into(),
        message: message.into(),
        related: Some(related),
        is_read: false,
        created_at: now,
        updated_at: now,
    }
}
