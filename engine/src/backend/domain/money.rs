//! Money and date helpers shared by every ledger component.
//!
//! These are best-effort numeric helpers: a missing or unusable input yields a zero
//! (or `None`) instead of an error, so preview screens can keep rendering.

use chrono::{Duration, Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use shared::{BalanceEntry, EntryType};

/// Interest rates are quoted per month; daily accrual divides by this
pub const DAYS_PER_MONTH: i64 = 30;

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// Display settings for monetary amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyFormat {
    pub symbol: String,
    pub decimal_separator: char,
    pub thousands_separator: char,
}

impl Default for CurrencyFormat {
    fn default() -> Self {
        Self {
            symbol: "$".to_string(),
            decimal_separator: '.',
            thousands_separator: ',',
        }
    }
}

/// Round to cents, halves away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Drop anything below a cent
pub fn truncate_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Format an amount like `-$1,234.50`
pub fn format_currency(amount: Decimal, format: &CurrencyFormat) -> String {
    let rounded = round_money(amount);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = format!("{:.2}", rounded.abs());
    let (integer_part, fraction_part) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(integer_part.len() + integer_part.len() / 3);
    for (index, digit) in integer_part.chars().enumerate() {
        if index > 0 && (integer_part.len() - index) % 3 == 0 {
            grouped.push(format.thousands_separator);
        }
        grouped.push(digit);
    }

    format!(
        "{}{}{}{}{}",
        if negative { "-" } else { "" },
        format.symbol,
        grouped,
        format.decimal_separator,
        fraction_part
    )
}

pub fn parse_iso_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), ISO_DATE_FORMAT).ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

/// Shift a date by a number of days (grace periods, interest windows)
pub fn calculate_due_date(base: NaiveDate, offset_days: i64) -> Option<NaiveDate> {
    base.checked_add_signed(Duration::try_days(offset_days)?)
}

/// Add calendar months, clamping to the last day of shorter months
pub fn add_months_clamped(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Simple daily-rate interest: `principal × monthly_rate × days / 30`, in cents.
///
/// Any missing argument, a negative day count or an overflow yields zero.
pub fn calculate_interest(
    principal: Option<Decimal>,
    monthly_rate: Option<Decimal>,
    days: Option<i64>,
) -> Decimal {
    let (Some(principal), Some(monthly_rate), Some(days)) = (principal, monthly_rate, days) else {
        return Decimal::ZERO;
    };
    if days < 0 {
        return Decimal::ZERO;
    }

    principal
        .checked_mul(monthly_rate)
        .and_then(|value| value.checked_mul(Decimal::from(days)))
        .and_then(|value| value.checked_div(Decimal::from(DAYS_PER_MONTH)))
        .map(round_money)
        .unwrap_or(Decimal::ZERO)
}

/// Principal plus interest; a missing principal yields zero
pub fn calculate_total_amount(principal: Option<Decimal>, interest: Option<Decimal>) -> Decimal {
    principal
        .and_then(|principal| principal.checked_add(interest.unwrap_or(Decimal::ZERO)))
        .unwrap_or(Decimal::ZERO)
}

/// Net of a sequence of movements: `sum(income) − sum(expense)`.
///
/// This is the general account-balance primitive used by reporting; the financing
/// ledger keeps its own balance chain.
pub fn calculate_balance(entries: Option<&[BalanceEntry]>) -> Decimal {
    let Some(entries) = entries else {
        return Decimal::ZERO;
    };

    entries
        .iter()
        .try_fold(Decimal::ZERO, |balance, entry| match entry.entry_type {
            EntryType::Income => balance.checked_add(entry.amount),
            EntryType::Expense => balance.checked_sub(entry.amount),
        })
        .unwrap_or(Decimal::ZERO)
}
