//! Column codecs shared by the SQL repositories.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use expensa_core::currency::CurrencyCode;
use expensa_core::domain::user::Role;

use super::RepositoryError;

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

/// Fixed-width UTC timestamps so lexical order matches time order.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    decode_timestamp(name, &raw)
}

pub(crate) fn optional_timestamp(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| decode_timestamp(name, &value)).transpose()
}

pub(crate) fn decimal(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn currency(row: &SqliteRow, name: &str) -> Result<CurrencyCode, RepositoryError> {
    let raw: String = column(row, name)?;
    CurrencyCode::parse(&raw).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn date(row: &SqliteRow, name: &str) -> Result<NaiveDate, RepositoryError> {
    let raw: String = column(row, name)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn role(row: &SqliteRow, name: &str) -> Result<Role, RepositoryError> {
    let raw: String = column(row, name)?;
    Role::from_str(&raw).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn encode_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}
