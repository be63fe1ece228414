//! Utility functions for database operations

use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

use warden::prelude::*;

/// Log database errors
pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// Map a query result to a value using a closure
pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> WdResult<T>
where
	F: FnOnce(&SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(ref row) => f(row).inspect_err(inspect).map_err(|_| Error::DbError),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => {
			inspect(&err);
			Err(Error::DbError)
		}
	}
}

/// Collect result iterator into a vector
pub(crate) fn collect_res<T>(
	iter: impl Iterator<Item = Result<T, sqlx::Error>>,
) -> WdResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

/// Parse a TEXT column into a `FromStr` type, surfacing failures as
/// column decode errors so `map_res`/`collect_res` can log them.
pub(crate) fn parse_col<T: FromStr>(column: &str, raw: &str) -> Result<T, sqlx::Error> {
	raw.parse().map_err(|_| sqlx::Error::ColumnDecode {
		index: column.into(),
		source: format!("unparseable value: {}", raw).into(),
	})
}

// vim: ts=4
