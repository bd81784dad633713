//! Fixed account service: creation, materialization of dated instances and the
//! instance lifecycle.
//!
//! Rollover decisions come from [`crate::backend::domain::recurrence`]; this service
//! only loads state, asks for a plan and persists it. The store's
//! `(fixed_account_id, due_date)` constraint makes materialization idempotent, so
//! overlapping scheduler runs never duplicate an instance. Account writes are
//! conditional on the state they were planned from, so a stale copy of an account
//! never reactivates it or moves its due date backwards.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    AuditEntry, AuditOutcome, CreateFixedAccountRequest, FixedAccount, FixedAccountTransaction,
    PayFixedAccountTransactionRequest, PaymentStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::domain::errors::{LedgerError, LedgerResult};
use crate::backend::domain::money::days_between;
use crate::backend::domain::recurrence::{
    check_overdue, check_transition, first_cycle_instance, is_cycle_due, plan_next_cycle,
};
use crate::backend::storage::{
    AuditStorage, Connection, FixedAccountStorage, FixedAccountTransactionStorage,
    MaterializeWrite,
};

/// Upper bound on cycles materialized for one account in a single roll-forward
pub const MAX_CATCH_UP_CYCLES: u32 = 400;

const DEFAULT_REMINDER_DAYS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeOutcome {
    Created(FixedAccountTransaction),
    /// An instance for the next due date is already stored; nothing was written
    AlreadyExists,
}

/// A pending instance close enough to its due date to remind the owner
#[derive(Debug, Clone, PartialEq)]
pub struct DueReminder {
    pub account: FixedAccount,
    pub instance: FixedAccountTransaction,
    pub days_until_due: i64,
}

#[derive(Clone)]
pub struct RecurrenceService<C: Connection> {
    account_repository: C::FixedAccountRepository,
    instance_repository: C::FixedAccountTransactionRepository,
    audit_repository: C::AuditRepository,
}

impl<C: Connection> RecurrenceService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            account_repository: connection.create_fixed_account_repository(),
            instance_repository: connection.create_fixed_account_transaction_repository(),
            audit_repository: connection.create_audit_repository(),
        }
    }

    /// Register a recurring obligation and materialize its first instance on the start date
    pub async fn create_fixed_account(
        &self,
        request: CreateFixedAccountRequest,
    ) -> LedgerResult<FixedAccount> {
        info!(
            "Creating {} fixed account for user {}: {} {}",
            request.periodicity.as_str(),
            request.user_id,
            request.amount,
            request.description
        );

        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(request.amount));
        }

        let now = Utc::now();
        let account = FixedAccount {
            id: FixedAccount::generate_id(),
            user_id: request.user_id,
            description: request.description.trim().to_string(),
            amount: request.amount,
            periodicity: request.periodicity,
            account_type: request.account_type,
            start_date: request.start_date,
            next_due_date: request.start_date,
            is_active: true,
            is_paid: false,
            reminder_days: request.reminder_days.unwrap_or(DEFAULT_REMINDER_DAYS),
            created_at: now,
            updated_at: now,
        };

        self.account_repository
            .open_fixed_account(&account, &first_cycle_instance(&account, now))
            .await?;

        info!("Created fixed account {} first due {}", account.id, account.next_due_date);
        Ok(account)
    }

    pub async fn get_fixed_account(&self, fixed_account_id: &str) -> LedgerResult<FixedAccount> {
        self.account_repository
            .get_fixed_account(fixed_account_id)
            .await?
            .ok_or_else(|| LedgerError::FixedAccountNotFound(fixed_account_id.to_string()))
    }

    async fn load_instance(&self, transaction_id: &str) -> LedgerResult<FixedAccountTransaction> {
        self.instance_repository
            .get_instance(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::InstanceNotFound(transaction_id.to_string()))
    }

    /// Instances of an account ordered by due date
    pub async fn list_instances(
        &self,
        fixed_account_id: &str,
    ) -> LedgerResult<Vec<FixedAccountTransaction>> {
        self.get_fixed_account(fixed_account_id).await?;
        Ok(self.instance_repository.list_instances(fixed_account_id).await?)
    }

    /// Create the instance for the cycle after the account's current one and roll the
    /// account forward, or report that the instance already exists
    pub async fn materialize_next_due(&self, account: &FixedAccount) -> LedgerResult<MaterializeOutcome> {
        let plan = plan_next_cycle(account, Utc::now())?;

        let write = self
            .instance_repository
            .materialize_instance(&plan.instance, Some(&plan.advance))
            .await?;

        match write {
            MaterializeWrite::Created => {
                info!(
                    "Materialized instance {} of fixed account {} due {}",
                    plan.instance.id, account.id, plan.instance.due_date
                );
                Ok(MaterializeOutcome::Created(plan.instance))
            }
            MaterializeWrite::InstanceExists { account_advanced } => {
                if account_advanced {
                    info!(
                        "Moved fixed account {} up to its existing instance due {}",
                        account.id, plan.instance.due_date
                    );
                } else {
                    debug!(
                        "Instance of fixed account {} due {} already exists",
                        account.id, plan.instance.due_date
                    );
                }
                Ok(MaterializeOutcome::AlreadyExists)
            }
            MaterializeWrite::AccountMoved => {
                let current = self.get_fixed_account(&account.id).await?;
                if !current.is_active {
                    return Err(LedgerError::FixedAccountInactive(account.id.clone()));
                }
                debug!(
                    "Fixed account {} moved past {} before its next cycle was written",
                    account.id, account.next_due_date
                );
                Ok(MaterializeOutcome::AlreadyExists)
            }
        }
    }

    /// Materialize the next cycle of every active account whose current cycle has arrived.
    ///
    /// Accounts that fell behind catch up one cycle at a time. An account lagging behind
    /// an instance that already exists is moved up to it and keeps catching up. A failing
    /// account is logged and skipped so the rest still roll over.
    pub async fn roll_forward_due(&self, today: NaiveDate) -> LedgerResult<Vec<FixedAccountTransaction>> {
        let accounts = self.account_repository.list_active_fixed_accounts().await?;
        let mut created = Vec::new();

        for account in accounts {
            let mut current = account;
            let mut cycles = 0;

            while is_cycle_due(&current, today) && cycles < MAX_CATCH_UP_CYCLES {
                match self.materialize_next_due(&current).await {
                    Ok(MaterializeOutcome::Created(instance)) => created.push(instance),
                    Ok(MaterializeOutcome::AlreadyExists) => {}
                    Err(e) => {
                        warn!("Failed to roll over fixed account {}: {}", current.id, e);
                        break;
                    }
                }
                cycles += 1;

                match self.account_repository.get_fixed_account(&current.id).await? {
                    Some(reloaded) if reloaded.next_due_date > current.next_due_date => {
                        current = reloaded
                    }
                    _ => break,
                }
            }

            if cycles == MAX_CATCH_UP_CYCLES {
                warn!(
                    "Fixed account {} still behind after {} cycles",
                    current.id, MAX_CATCH_UP_CYCLES
                );
            }
        }

        if !created.is_empty() {
            info!("Rolled forward {} fixed account instances", created.len());
        }
        Ok(created)
    }

    /// Flip every pending instance due before `today` to overdue
    pub async fn sweep_overdue(&self, today: NaiveDate) -> LedgerResult<Vec<FixedAccountTransaction>> {
        let swept = self
            .instance_repository
            .mark_overdue_before(today, Utc::now())
            .await?;
        if !swept.is_empty() {
            info!("Marked {} fixed account instances overdue", swept.len());
        }
        Ok(swept)
    }

    /// Mark one instance overdue; it must be pending and past its due date
    pub async fn mark_overdue(
        &self,
        transaction_id: &str,
        today: NaiveDate,
    ) -> LedgerResult<FixedAccountTransaction> {
        let mut instance = self.load_instance(transaction_id).await?;
        check_overdue(&instance, today)?;

        instance.status = PaymentStatus::Overdue;
        instance.updated_at = Utc::now();
        self.instance_repository.update_instance(&instance).await?;
        Ok(instance)
    }

    /// Settle a pending or overdue instance
    pub async fn pay_instance(
        &self,
        request: PayFixedAccountTransactionRequest,
    ) -> LedgerResult<FixedAccountTransaction> {
        info!("Paying fixed account instance {}", request.transaction_id);

        let mut instance = self.load_instance(&request.transaction_id).await?;
        check_transition(&instance, PaymentStatus::Paid)?;

        let now = Utc::now();
        instance.status = PaymentStatus::Paid;
        instance.payment_date = Some(request.payment_date);
        instance.payment_method = request.payment_method;
        instance.ledger_transaction_id = request.ledger_transaction_id;
        instance.updated_at = now;
        self.instance_repository.update_instance(&instance).await?;

        // Only flags the account while this instance is still its current cycle
        let flagged = self
            .account_repository
            .mark_cycle_paid(&instance.fixed_account_id, instance.due_date, now)
            .await?;
        if !flagged {
            debug!(
                "Fixed account {} is no longer on the cycle due {}",
                instance.fixed_account_id, instance.due_date
            );
        }

        Ok(instance)
    }

    /// Cancel a pending instance on behalf of `actor`
    pub async fn cancel_instance(
        &self,
        transaction_id: &str,
        actor: &str,
    ) -> LedgerResult<FixedAccountTransaction> {
        info!("{} is cancelling fixed account instance {}", actor, transaction_id);

        let result = self.cancel(transaction_id).await;

        let entry = match &result {
            Ok(_) => AuditEntry::new(actor, "fixed_account_transaction.cancel", transaction_id, AuditOutcome::Success),
            Err(e) => AuditEntry::new(actor, "fixed_account_transaction.cancel", transaction_id, AuditOutcome::Failure)
                .with_detail(e.to_string()),
        };
        if let Err(e) = self.audit_repository.record_audit(&entry).await {
            warn!("Failed to audit cancellation of {}: {}", transaction_id, e);
        }

        result
    }

    async fn cancel(&self, transaction_id: &str) -> LedgerResult<FixedAccountTransaction> {
        let mut instance = self.load_instance(transaction_id).await?;
        check_transition(&instance, PaymentStatus::Cancelled)?;

        instance.status = PaymentStatus::Cancelled;
        instance.updated_at = Utc::now();
        self.instance_repository.update_instance(&instance).await?;
        Ok(instance)
    }

    /// Stop materializing new instances for an account; existing ones are kept
    pub async fn deactivate_account(&self, fixed_account_id: &str) -> LedgerResult<FixedAccount> {
        self.get_fixed_account(fixed_account_id).await?;

        let deactivated = self
            .account_repository
            .deactivate_fixed_account(fixed_account_id, Utc::now())
            .await?;
        if !deactivated {
            return Err(LedgerError::FixedAccountInactive(fixed_account_id.to_string()));
        }

        info!("Deactivated fixed account {}", fixed_account_id);
        self.get_fixed_account(fixed_account_id).await
    }

    /// Pending instances due within their account's reminder window, soonest first
    pub async fn upcoming_due(&self, today: NaiveDate) -> LedgerResult<Vec<DueReminder>> {
        let pending = self
            .instance_repository
            .list_instances_by_status(PaymentStatus::Pending)
            .await?;

        let mut reminders = Vec::new();
        for instance in pending {
            let days_until_due = days_between(today, instance.due_date);
            if days_until_due < 0 {
                continue;
            }

            let Some(account) = self
                .account_repository
                .get_fixed_account(&instance.fixed_account_id)
                .await?
            else {
                warn!("Instance {} points at a missing fixed account", instance.id);
                continue;
            };

            if account.is_active && days_until_due <= i64::from(account.reminder_days) {
                reminders.push(DueReminder {
                    account,
                    instance,
                    days_until_due,
                });
            }
        }

        Ok(reminders)
    }
}
