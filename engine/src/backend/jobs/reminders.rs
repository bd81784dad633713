//! Raises `payment_due` notifications for pending instances inside their account's
//! reminder window. Re-runs refresh the existing notification instead of adding one.

use async_trait::async_trait;
use chrono::NaiveDate;
use shared::{NotificationKind, RelatedEntity};
use std::sync::Arc;
use tracing::info;

use super::{new_notification, ScheduledJob};
use crate::backend::domain::money::{format_currency, format_iso_date, CurrencyFormat};
use crate::backend::domain::{DueReminder, JobOutcome, RecurrenceService};
use crate::backend::storage::{Connection, NotificationStorage};

pub const REMINDERS_JOB: &str = "reminders";

pub struct RemindersJob<C: Connection> {
    recurrence_service: RecurrenceService<C>,
    notification_repository: C::NotificationRepository,
    currency: CurrencyFormat,
}

impl<C: Connection> RemindersJob<C> {
    pub fn new(connection: Arc<C>, currency: CurrencyFormat) -> Self {
        Self {
            recurrence_service: RecurrenceService::new(connection.clone()),
            notification_repository: connection.create_notification_repository(),
            currency,
        }
    }

    fn describe(&self, reminder: &DueReminder) -> (String, String) {
        let amount = format_currency(reminder.instance.amount, &self.currency);
        let due = format_iso_date(reminder.instance.due_date);
        match reminder.days_until_due {
            0 => (
                "Payment due today".to_string(),
                format!("{}: {} is due today ({})", reminder.account.description, amount, due),
            ),
            1 => (
                "Payment due tomorrow".to_string(),
                format!("{}: {} is due tomorrow ({})", reminder.account.description, amount, due),
            ),
            days => (
                "Payment due soon".to_string(),
                format!("{}: {} is due in {} days ({})", reminder.account.description, amount, days, due),
            ),
        }
    }
}

#[async_trait]
impl<C: Connection> ScheduledJob for RemindersJob<C> {
    fn name(&self) -> &'static str {
        REMINDERS_JOB
    }

    async fn run(&self, today: NaiveDate) -> anyhow::Result<JobOutcome> {
        let reminders = self.recurrence_service.upcoming_due(today).await?;

        let mut outcome = JobOutcome::default();
        for reminder in &reminders {
            let (title, message) = self.describe(reminder);
            let notification = new_notification(
                &reminder.instance.user_id,
                NotificationKind::PaymentDue,
                title,
                message,
                RelatedEntity::FixedAccountTransaction {
                    transaction_id: reminder.instance.id.clone(),
                },
            );
            outcome.record(self.notification_repository.upsert_notification(&notification).await?);
        }

        info!("Sent {} payment reminders for {}", reminders.len(), today);
        Ok(outcome.with_metadata("reminders", reminders.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::storage::sqlite::test_utils::{date, test_db};
    use rust_decimal_macros::dec;
    use shared::{CreateFixedAccountRequest, EntryType, Periodicity};

    fn rent(start: &str, reminder_days: u32) -> CreateFixedAccountRequest {
        CreateFixedAccountRequest {
            user_id: "user::alice".to_string(),
            description: "Rent".to_string(),
            amount: dec!(1500),
            periodicity: Periodicity::Monthly,
            account_type: EntryType::Expense,
            start_date: date(start),
            reminder_days: Some(reminder_days),
        }
    }

    #[tokio::test]
    async fn test_reminders_within_window() {
        let db = test_db().await;
        let connection = Arc::new(db.clone());
        let recurrence = RecurrenceService::new(connection.clone());
        recurrence.create_fixed_account(rent("2024-03-05", 3)).await.unwrap();
        recurrence.create_fixed_account(rent("2024-03-20", 3)).await.unwrap();

        let job = RemindersJob::new(connection, CurrencyFormat::default());
        let outcome = job.run(date("2024-03-03")).await.unwrap();

        assert_eq!(outcome.notifications_created, 1);
        assert_eq!(outcome.metadata["reminders"], 1);

        let notifications = db
            .create_notification_repository()
            .list_notifications("user::alice")
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::PaymentDue);
        assert_eq!(notifications[0].title, "Payment due soon");
        assert_eq!(notifications[0].message, "Rent: $1,500.00 is due in 2 days (2024-03-05)");
    }

    #[tokio::test]
    async fn test_rerun_updates_existing_reminder() {
        let db = test_db().await;
        let connection = Arc::new(db.clone());
        RecurrenceService::new(connection.clone())
            .create_fixed_account(rent("2024-03-05", 3))
            .await
            .unwrap();
        let job = RemindersJob::new(connection, CurrencyFormat::default());

        job.run(date("2024-03-04")).await.unwrap();
        let rerun = job.run(date("2024-03-05")).await.unwrap();

        assert_eq!(rerun.notifications_created, 0);
        assert_eq!(rerun.notifications_updated, 1);
        let notifications = db
            .create_notification_repository()
            .list_notifications("user::alice")
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Payment due today");
    }
}
