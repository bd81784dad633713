//! Column encoding shared by the SQLite repositories.
//!
//! Decimals are stored as TEXT to keep them exact, calendar dates as `YYYY-MM-DD` and
//! instants as RFC 3339 UTC with nanoseconds, which sorts correctly as text.

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn encode_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).with_context(|| format!("Invalid decimal in column {}: {}", column, raw))
}

pub fn date(row: &SqliteRow, column: &str) -> Result<NaiveDate> {
    let raw: String = row.try_get(column)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .with_context(|| format!("Invalid date in column {}: {}", column, raw))
}

pub fn optional_date(row: &SqliteRow, column: &str) -> Result<Option<NaiveDate>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .with_context(|| format!("Invalid date in column {}: {}", column, raw))
    })
    .transpose()
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in column {}: {}", column, raw))
}

pub fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(column, &raw)
}

pub fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_timestamp(column, &raw)).transpose()
}

/// Decode a TEXT column through the enum's storage name
pub fn enumeration<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| anyhow!("Column {}: {}", column, e))
}

pub fn count(row: &SqliteRow, column: &str) -> Result<u32> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).with_context(|| format!("Column {} out of range: {}", column, raw))
}
