// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Column conversion helpers shared by the repositories.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::error::DbError;

pub(crate) fn uuid(row: &SqliteRow, column: &str) -> Result<Uuid, DbError> {
	let s: String = row.try_get(column)?;
	Uuid::parse_str(&s).map_err(|e| DbError::Internal(format!("{column}: {e}")))
}

pub(crate) fn opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, DbError> {
	let s: Option<String> = row.try_get(column)?;
	s.map(|s| Uuid::parse_str(&s))
		.transpose()
		.map_err(|e| DbError::Internal(format!("{column}: {e}")))
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, DbError> {
	let s: String = row.try_get(column)?;
	parse_timestamp(&s).map_err(|e| DbError::Internal(format!("{column}: {e}")))
}

pub(crate) fn opt_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, DbError> {
	let s: Option<String> = row.try_get(column)?;
	s.map(|s| parse_timestamp(&s))
		.transpose()
		.map_err(|e| DbError::Internal(format!("{column}: {e}")))
}

pub(crate) fn flag(row: &SqliteRow, column: &str) -> Result<bool, DbError> {
	Ok(row.try_get::<i64, _>(column)? != 0)
}

/// JSON array of strings stored in a TEXT column.
pub(crate) fn string_list(row: &SqliteRow, column: &str) -> Result<Vec<String>, DbError> {
	let s: String = row.try_get(column)?;
	if s.is_empty() {
		return Ok(Vec::new());
	}
	Ok(serde_json::from_str(&s)?)
}

pub(crate) fn enum_column<T>(row: &SqliteRow, column: &str) -> Result<T, DbError>
where
	T: std::str::FromStr<Err = String>,
{
	let s: String = row.try_get(column)?;
	s.parse().map_err(DbError::Internal)
}

/// Fixed-width so TEXT ordering matches chronological ordering.
pub(crate) fn ts(value: &DateTime<Utc>) -> String {
	value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
	value.as_ref().map(ts)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
	DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}
