//! Recurrence rules for fixed accounts.
//!
//! Everything here is pure: due-date arithmetic, the rollover plan for the next cycle
//! and the instance status lifecycle. `RecurrenceService` persists what these
//! functions decide.
//!
//! Instance lifecycle:
//! ```text
//! pending ──► paid
//!    │  └───► cancelled
//!    ▼
//! overdue ──► paid
//! ```

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use shared::{FixedAccount, FixedAccountTransaction, PaymentStatus, Periodicity};

use crate::backend::domain::errors::{LedgerError, LedgerResult};
use crate::backend::domain::money::{add_months_clamped, calculate_due_date};
use crate::backend::storage::CycleAdvance;

/// The n-th occurrence of a schedule anchored on `anchor` (n = 0 is the anchor itself).
///
/// Month-based periods are computed from the anchor rather than chained, so the
/// anchor's day of month survives short months (Jan 31, Feb 29, Mar 31).
pub fn nth_occurrence(anchor: NaiveDate, periodicity: Periodicity, n: u32) -> Option<NaiveDate> {
    match (periodicity.days(), periodicity.months()) {
        (Some(days), _) => calculate_due_date(anchor, i64::try_from(days * n as u64).ok()?),
        (_, Some(months)) => add_months_clamped(anchor, months.checked_mul(n)?),
        _ => None,
    }
}

/// First occurrence strictly after `current` on the schedule anchored at `anchor`
pub fn next_occurrence_after(
    anchor: NaiveDate,
    periodicity: Periodicity,
    current: NaiveDate,
) -> Option<NaiveDate> {
    if let Some(days) = periodicity.days() {
        return calculate_due_date(current, days as i64);
    }

    let step = periodicity.months()?;
    let elapsed_months =
        (current.year() - anchor.year()) * 12 + current.month() as i32 - anchor.month() as i32;
    let mut n = u32::try_from(elapsed_months.max(0)).ok()? / step;

    loop {
        let candidate = nth_occurrence(anchor, periodicity, n)?;
        if candidate > current {
            return Some(candidate);
        }
        n = n.checked_add(1)?;
    }
}

/// Instance plus the account advance that must be written with it
#[derive(Debug, Clone, PartialEq)]
pub struct CyclePlan {
    pub instance: FixedAccountTransaction,
    pub advance: CycleAdvance,
}

fn pending_instance(
    account: &FixedAccount,
    due_date: NaiveDate,
    now: DateTime<Utc>,
) -> FixedAccountTransaction {
    FixedAccountTransaction {
        id: FixedAccountTransaction::generate_id(),
        user_id: account.user_id.clone(),
        fixed_account_id: account.id.clone(),
        due_date,
        amount: account.amount,
        status: PaymentStatus::Pending,
        payment_date: None,
        payment_method: None,
        ledger_transaction_id: None,
        created_at: now,
        updated_at: now,
    }
}

/// Instance for the cycle an account starts with
pub fn first_cycle_instance(account: &FixedAccount, now: DateTime<Utc>) -> FixedAccountTransaction {
    pending_instance(account, account.next_due_date, now)
}

/// Decide the next cycle of an obligation: the instance to create and the move of the
/// account's next due date from its current cycle to the new one.
pub fn plan_next_cycle(account: &FixedAccount, now: DateTime<Utc>) -> LedgerResult<CyclePlan> {
    if !account.is_active {
        return Err(LedgerError::FixedAccountInactive(account.id.clone()));
    }

    let due_date = next_occurrence_after(account.start_date, account.periodicity, account.next_due_date)
        .ok_or_else(|| {
            LedgerError::InvalidDate(format!(
                "no {} occurrence after {}",
                account.periodicity.as_str(),
                account.next_due_date
            ))
        })?;

    Ok(CyclePlan {
        instance: pending_instance(account, due_date, now),
        advance: CycleAdvance {
            fixed_account_id: account.id.clone(),
            from_due_date: account.next_due_date,
            to_due_date: due_date,
            updated_at: now,
        },
    })
}

/// Whether the cycle currently tracked by the account has arrived
pub fn is_cycle_due(account: &FixedAccount, today: NaiveDate) -> bool {
    account.is_active && account.next_due_date <= today
}

/// Validate a status change against the instance lifecycle
pub fn check_transition(instance: &FixedAccountTransaction, to: PaymentStatus) -> LedgerResult<()> {
    let allowed = matches!(
        (instance.status, to),
        (PaymentStatus::Pending, PaymentStatus::Paid)
            | (PaymentStatus::Pending, PaymentStatus::Overdue)
            | (PaymentStatus::Pending, PaymentStatus::Cancelled)
            | (PaymentStatus::Overdue, PaymentStatus::Paid)
    );

    if allowed {
        Ok(())
    } else {
        Err(LedgerError::InvalidStatusTransition {
            transaction_id: instance.id.clone(),
            from: instance.status,
            to,
        })
    }
}

/// An instance may only become overdue while pending and once its due date has passed
pub fn check_overdue(instance: &FixedAccountTransaction, today: NaiveDate) -> LedgerResult<()> {
    if instance.status != PaymentStatus::Pending {
        return Err(LedgerError::OverdueConflict {
            transaction_id: instance.id.clone(),
            reason: format!("status is {}", instance.status),
        });
    }
    if instance.due_date >= today {
        return Err(LedgerError::OverdueConflict {
            transaction_id: instance.id.clone(),
            reason: format!("due date {} has not passed", instance.due_date),
        });
    }
    Ok(())
}
