//! Database query modules.
//!
//! Free functions over a borrowed [`rusqlite::Connection`], one module per
//! table group. Callers choose the transaction boundaries.

pub mod categories;
pub mod cleanup;
pub mod executions;
pub mod rules;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parses an RFC 3339 column, falling back to now for unreadable values.
pub(crate) fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Encodes a value for a JSON text column.
pub(crate) fn to_json<T: Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Decodes a JSON text column at `index`.
pub(crate) fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row,
    index: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}
