//! Overdue sweep: flags fixed-account instances past their due date and raises
//! `payment_overdue` notifications for them and for unpaid financing installments.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{NotificationKind, RelatedEntity};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{new_notification, ScheduledJob};
use crate::backend::domain::money::{format_currency, format_iso_date, CurrencyFormat};
use crate::backend::domain::{FinancingService, JobOutcome, OverdueInstallment, RecurrenceService};
use crate::backend::storage::{Connection, NotificationStorage};

pub const PAYMENT_CHECK_JOB: &str = "payment_check";

pub struct PaymentCheckJob<C: Connection> {
    recurrence_service: RecurrenceService<C>,
    financing_service: FinancingService<C>,
    notification_repository: C::NotificationRepository,
    currency: CurrencyFormat,
}

impl<C: Connection> PaymentCheckJob<C> {
    pub fn new(connection: Arc<C>, currency: CurrencyFormat) -> Self {
        Self {
            recurrence_service: RecurrenceService::new(connection.clone()),
            financing_service: FinancingService::new(connection.clone()),
            notification_repository: connection.create_notification_repository(),
            currency,
        }
    }

    async fn check_fixed_accounts(&self, today: NaiveDate, outcome: &mut JobOutcome) -> anyhow::Result<usize> {
        let swept = self.recurrence_service.sweep_overdue(today).await?;

        for instance in &swept {
            let description = match self
                .recurrence_service
                .get_fixed_account(&instance.fixed_account_id)
                .await
            {
                Ok(account) => account.description,
                Err(e) => {
                    warn!("Overdue instance {} has no readable account: {}", instance.id, e);
                    continue;
                }
            };

            let notification = new_notification(
                &instance.user_id,
                NotificationKind::PaymentOverdue,
                "Payment overdue",
                format!(
                    "{}: {} was due on {}",
                    description,
                    format_currency(instance.amount, &self.currency),
                    format_iso_date(instance.due_date)
                ),
                RelatedEntity::FixedAccountTransaction {
                    transaction_id: instance.id.clone(),
                },
            );
            outcome.record(self.notification_repository.upsert_notification(&notification).await?);
        }

        Ok(swept.len())
    }

    async fn check_financings(&self, today: NaiveDate, outcome: &mut JobOutcome) -> anyhow::Result<usize> {
        let overdue = self.financing_service.overdue_installments(today).await?;
        let count = overdue.len();

        let mut by_financing: BTreeMap<String, Vec<OverdueInstallment>> = BTreeMap::new();
        for item in overdue {
            by_financing.entry(item.financing_id.clone()).or_default().push(item);
        }

        for (financing_id, items) in by_financing {
            let Some(earliest) = items.iter().min_by_key(|item| item.installment.number) else {
                continue;
            };
            let total: Decimal = items.iter().map(|item| item.installment.amount).sum();
            let message = if items.len() == 1 {
                format!(
                    "{}: installment {} of {} was due on {}",
                    earliest.description,
                    earliest.installment.number,
                    format_currency(total, &self.currency),
                    format_iso_date(earliest.installment.due_date)
                )
            } else {
                format!(
                    "{}: {} installments totalling {} overdue since {}",
                    earliest.description,
                    items.len(),
                    format_currency(total, &self.currency),
                    format_iso_date(earliest.installment.due_date)
                )
            };

            let notification = new_notification(
                &earliest.user_id,
                NotificationKind::PaymentOverdue,
                "Installment overdue",
                message,
                RelatedEntity::Financing { financing_id },
            );
            outcome.record(self.notification_repository.upsert_notification(&notification).await?);
        }

        Ok(count)
    }
}

#[async_trait]
impl<C: Connection> ScheduledJob for PaymentCheckJob<C> {
    fn name(&self) -> &'static str {
        PAYMENT_CHECK_JOB
    }

    async fn run(&self, today: NaiveDate) -> anyhow::Result<JobOutcome> {
        let mut outcome = JobOutcome::default();
        let instances = self.check_fixed_accounts(today, &mut outcome).await?;
        let installments = self.check_financings(today, &mut outcome).await?;

        info!(
            "Payment check for {}: {} instances newly overdue, {} installments overdue",
            today, instances, installments
        );
        Ok(outcome
            .with_metadata("overdue_instances", instances)
            .with_metadata("overdue_installments", installments))
    }
}
