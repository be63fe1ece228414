//! Violation audit-log queries
//!
//! Append-only: rows are inserted on every block or threshold breach and
//! never updated. Listing builds its WHERE clause dynamically from the
//! caller's filters.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use warden::guard_adapter::{ListViolationsOptions, Violation};
use warden::prelude::*;

fn map_violation_row(row: &SqliteRow) -> Result<Violation, sqlx::Error> {
	let ip: Option<&str> = row.try_get("ip")?;
	Ok(Violation {
		tn_id: TnId(row.try_get("tn_id")?),
		identifier: row.try_get::<&str, _>("identifier")?.into(),
		kind: parse_col("kind", row.try_get("kind")?)?,
		ip: ip.map(|raw| parse_col("ip", raw)).transpose()?,
		endpoint: row.try_get::<Option<&str>, _>("endpoint")?.map(Into::into),
		method: row.try_get::<Option<&str>, _>("method")?.map(Into::into),
		limit_type: parse_col("limit_type", row.try_get("limit_type")?)?,
		current_rate: row.try_get("current_rate")?,
		limit_rate: row.try_get("limit_rate")?,
		created_at: Timestamp(row.try_get("created_at")?),
		action_taken: row.try_get::<&str, _>("action_taken")?.into(),
	})
}

pub(crate) async fn insert_violation(db: &SqlitePool, violation: &Violation) -> WdResult<()> {
	sqlx::query(
		"INSERT INTO rate_limit_violations (tn_id, identifier, kind, ip, endpoint, method, \
			limit_type, current_rate, limit_rate, action_taken, created_at) \
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
	)
	.bind(violation.tn_id.0)
	.bind(&*violation.identifier)
	.bind(violation.kind.as_str())
	.bind(violation.ip.map(|ip| ip.to_string()))
	.bind(violation.endpoint.as_deref())
	.bind(violation.method.as_deref())
	.bind(violation.limit_type.as_str())
	.bind(violation.current_rate)
	.bind(violation.limit_rate)
	.bind(&*violation.action_taken)
	.bind(violation.created_at.0)
	.execute(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	Ok(())
}

pub(crate) async fn list_violations(
	db: &SqlitePool,
	tn_id: TnId,
	opts: &ListViolationsOptions,
) -> WdResult<Vec<Violation>> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT tn_id, identifier, kind, ip, endpoint, method, limit_type, current_rate, \
			limit_rate, action_taken, created_at \
		FROM rate_limit_violations WHERE tn_id = ",
	);
	query.push_bind(tn_id.0);

	if let Some(limit_type) = opts.limit_type {
		query.push(" AND limit_type = ").push_bind(limit_type.as_str());
	}
	if let Some(ip) = opts.ip {
		query.push(" AND ip = ").push_bind(ip.to_string());
	}
	if let Some(since) = opts.since {
		query.push(" AND created_at >= ").push_bind(since.0);
	}
	query.push(" ORDER BY created_at DESC LIMIT ");
	query.push_bind(opts.limit.unwrap_or(100));
	query.push(" OFFSET ");
	query.push_bind(opts.offset.unwrap_or(0));

	let rows = query.build().fetch_all(db).await.inspect_err(inspect).or(Err(Error::DbError))?;

	collect_res(rows.iter().map(map_violation_row))
}

// vim: ts=4
