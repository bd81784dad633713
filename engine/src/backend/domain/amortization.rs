//! Installment schedule generation for financed principals.
//!
//! Every installment carries the per-unit amount `principal / count`, truncated to
//! cents. Installment 1 always keeps exactly that amount (1000 over 3 gives 333.33 for
//! the first installment); the sub-cent remainder is folded into the closing
//! installment so the schedule sums to the principal.

use rust_decimal::Decimal;
use shared::{Financing, Installment, Periodicity};
use tracing::warn;

use crate::backend::domain::errors::{LedgerError, LedgerResult};
use crate::backend::domain::money::{format_iso_date, parse_iso_date, truncate_money};
use crate::backend::domain::recurrence::nth_occurrence;

/// Longest plan accepted: fifty years of monthly installments
pub const MAX_INSTALLMENTS: u32 = 600;

/// Split a principal into installment amounts that sum to it exactly
fn installment_amounts(principal: Decimal, installment_count: u32) -> Vec<Decimal> {
    let count = Decimal::from(installment_count);
    let per_unit = truncate_money(principal / count);
    let remainder = principal - per_unit * count;

    let mut amounts = vec![per_unit; installment_count as usize];
    if let Some(closing) = amounts.last_mut() {
        *closing += remainder;
    }
    amounts
}

fn validate_terms(principal: Decimal, installment_count: u32) -> LedgerResult<()> {
    if principal <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(principal));
    }
    if installment_count == 0 || installment_count > MAX_INSTALLMENTS {
        return Err(LedgerError::InvalidTerm);
    }
    Ok(())
}

/// Strict schedule generation; every installment is due on `start_date`
pub fn try_generate_schedule(
    principal: Decimal,
    installment_count: u32,
    start_date: &str,
) -> LedgerResult<Vec<Installment>> {
    validate_terms(principal, installment_count)?;
    let due_date =
        parse_iso_date(start_date).ok_or_else(|| LedgerError::InvalidDate(start_date.to_string()))?;

    Ok(installment_amounts(principal, installment_count)
        .into_iter()
        .zip(1..)
        .map(|(amount, number)| Installment {
            number,
            amount,
            due_date,
        })
        .collect())
}

/// Best-effort schedule generation for previews: invalid input yields an empty schedule
pub fn generate_schedule(
    principal: Decimal,
    installment_count: u32,
    start_date: &str,
) -> Vec<Installment> {
    match try_generate_schedule(principal, installment_count, start_date) {
        Ok(schedule) => schedule,
        Err(e) => {
            warn!(
                "Returning empty schedule for principal={} count={} start={}: {}",
                principal, installment_count, start_date, e
            );
            Vec::new()
        }
    }
}

/// Schedule whose installment k falls on the (k-1)-th periodic occurrence of `start_date`
pub fn generate_spaced_schedule(
    principal: Decimal,
    installment_count: u32,
    start_date: &str,
    periodicity: Periodicity,
) -> LedgerResult<Vec<Installment>> {
    validate_terms(principal, installment_count)?;
    let anchor =
        parse_iso_date(start_date).ok_or_else(|| LedgerError::InvalidDate(start_date.to_string()))?;

    installment_amounts(principal, installment_count)
        .into_iter()
        .zip(1u32..)
        .map(|(amount, number)| {
            let due_date = nth_occurrence(anchor, periodicity, number - 1)
                .ok_or_else(|| LedgerError::InvalidDate(start_date.to_string()))?;
            Ok(Installment {
                number,
                amount,
                due_date,
            })
        })
        .collect()
}

/// Installment plan of a stored financing
pub fn schedule_for(financing: &Financing) -> LedgerResult<Vec<Installment>> {
    generate_spaced_schedule(
        financing.principal,
        financing.installment_count,
        &format_iso_date(financing.start_date),
        financing.periodicity,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn total(schedule: &[Installment]) -> Decimal {
        schedule.iter().map(|i| i.amount).sum()
    }

    #[test]
    fn test_generate_schedule_thousand_over_three() {
        let schedule = generate_schedule(dec!(1000), 3, "2024-01-01");

        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[0].number, 1);
        assert_eq!(schedule[0].amount, dec!(333.33));
        assert_eq!(schedule[0].due_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(total(&schedule), dec!(1000));
    }

    #[test]
    fn test_schedule_sums_to_principal_for_awkward_splits() {
        let cases = [
            (dec!(1000), 7),
            (dec!(200), 3),
            (dec!(0.05), 3),
            (dec!(12345.67), 12),
            (dec!(99.99), 100),
            (dec!(1), 1),
        ];

        for (principal, count) in cases {
            let schedule = generate_schedule(principal, count, "2024-03-15");
            assert_eq!(schedule.len(), count as usize);
            assert_eq!(total(&schedule), principal, "principal {} over {}", principal, count);
            let per_unit = truncate_money(principal / Decimal::from(count));
            if count > 1 {
                assert_eq!(schedule[0].amount, per_unit);
            }
        }
    }

    #[test]
    fn test_base_schedule_keeps_start_date_for_every_installment() {
        let schedule = generate_schedule(dec!(300), 3, "2024-05-10");
        let start = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        assert!(schedule.iter().all(|i| i.due_date == start));
        assert_eq!(
            schedule.iter().map(|i| i.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_invalid_input_returns_empty_schedule() {
        assert!(generate_schedule(dec!(0), 3, "2024-01-01").is_empty());
        assert!(generate_schedule(dec!(-10), 3, "2024-01-01").is_empty());
        assert!(generate_schedule(dec!(1000), 0, "2024-01-01").is_empty());
        assert!(generate_schedule(dec!(1000), 3, "not-a-date").is_empty());
        assert!(generate_schedule(dec!(1000), u32::MAX, "2024-01-01").is_empty());
    }

    #[test]
    fn test_installment_count_is_capped() {
        let longest = try_generate_schedule(dec!(6000), MAX_INSTALLMENTS, "2024-01-01").unwrap();
        assert_eq!(longest.len(), MAX_INSTALLMENTS as usize);
        assert_eq!(total(&longest), dec!(6000));

        for count in [MAX_INSTALLMENTS + 1, u32::MAX] {
            assert!(matches!(
                try_generate_schedule(dec!(6000), count, "2024-01-01"),
                Err(LedgerError::InvalidTerm)
            ));
            assert!(matches!(
                generate_spaced_schedule(dec!(6000), count, "2024-01-01", Periodicity::Monthly),
                Err(LedgerError::InvalidTerm)
            ));
        }
    }

    #[test]
    fn test_try_generate_schedule_reports_specific_errors() {
        assert!(matches!(
            try_generate_schedule(dec!(0), 3, "2024-01-01"),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            try_generate_schedule(dec!(100), 0, "2024-01-01"),
            Err(LedgerError::InvalidTerm)
        ));
        assert!(matches!(
            try_generate_schedule(dec!(100), 2, "2024-13-01"),
            Err(LedgerError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_spaced_schedule_preserves_day_of_month() {
        let schedule =
            generate_spaced_schedule(dec!(1200), 4, "2024-01-31", Periodicity::Monthly).unwrap();
        let due_dates: Vec<String> = schedule.iter().map(|i| i.due_date.to_string()).collect();
        assert_eq!(due_dates, vec!["2024-01-31", "2024-02-29", "2024-03-31", "2024-04-30"]);
        assert_eq!(total(&schedule), dec!(1200));
    }

    #[test]
    fn test_spaced_schedule_weekly() {
        let schedule =
            generate_spaced_schedule(dec!(100), 3, "2024-01-01", Periodicity::Weekly).unwrap();
        let due_dates: Vec<String> = schedule.iter().map(|i| i.due_date.to_string()).collect();
        assert_eq!(due_dates, vec!["2024-01-01", "2024-01-08", "2024-01-15"]);
    }
}
