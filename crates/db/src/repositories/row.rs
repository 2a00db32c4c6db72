//! Row decoding helpers shared by the sql repositories.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use taskpay_core::domain::time_entry::TimeEntryId;
use taskpay_core::money::{Currency, Money};

use super::RepositoryError;

pub(crate) fn decode(message: impl Into<String>) -> RepositoryError {
    RepositoryError::Decode(message.into())
}

pub(crate) fn datetime(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| decode(format!("bad timestamp `{value}`: {error}")))
}

pub(crate) fn opt_datetime(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(datetime).transpose()
}

pub(crate) fn date(value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|error| decode(format!("bad date `{value}`: {error}")))
}

pub(crate) fn decimal(value: &str) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| decode(format!("bad decimal `{value}`: {error}")))
}

pub(crate) fn currency(value: &str) -> Result<Currency, RepositoryError> {
    Currency::parse(value).ok_or_else(|| decode(format!("unknown currency `{value}`")))
}

pub(crate) fn money(amount_minor: i64, currency_code: &str) -> Result<Money, RepositoryError> {
    Ok(Money::new(amount_minor, currency(currency_code)?))
}

pub(crate) fn opt_money(
    amount_minor: Option<i64>,
    currency_code: &str,
) -> Result<Option<Money>, RepositoryError> {
    amount_minor.map(|minor| money(minor, currency_code)).transpose()
}

pub(crate) fn entry_ids(value: &str) -> Result<Vec<TimeEntryId>, RepositoryError> {
    let raw: Vec<String> = serde_json::from_str(value)
        .map_err(|error| decode(format!("bad entry id list `{value}`: {error}")))?;
    Ok(raw.into_iter().map(TimeEntryId).collect())
}

pub(crate) fn entry_ids_json(ids: &[TimeEntryId]) -> String {
    let raw: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}
