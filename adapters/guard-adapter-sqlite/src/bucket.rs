//! Token-bucket queries
//!
//! The `rate_limits` table keys buckets by (tenant, identifier, kind,
//! endpoint) with the empty string standing in for "no endpoint", since
//! NULL cannot take part in the composite primary key.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use warden::guard_adapter::{BucketStats, IdentityKind, RateBucket};
use warden::prelude::*;

fn map_bucket_row(row: &SqliteRow) -> Result<RateBucket, sqlx::Error> {
	let endpoint: &str = row.try_get("endpoint")?;
	Ok(RateBucket {
		tn_id: TnId(row.try_get("tn_id")?),
		identifier: row.try_get::<&str, _>("identifier")?.into(),
		kind: parse_col("kind", row.try_get("kind")?)?,
		endpoint: (!endpoint.is_empty()).then(|| endpoint.into()),
		tokens_remaining: row.try_get("tokens_remaining")?,
		last_refill: row.try_get("last_refill")?,
		requests_count: row.try_get("requests_count")?,
		window_start: Timestamp(row.try_get("window_start")?),
	})
}

pub(crate) async fn read_bucket(
	db: &SqlitePool,
	tn_id: TnId,
	identifier: &str,
	kind: IdentityKind,
	endpoint: Option<&str>,
) -> WdResult<RateBucket> {
	let res = sqlx::query(
		"SELECT tn_id, identifier, kind, endpoint, tokens_remaining, last_refill, \
			requests_count, window_start \
		FROM rate_limits WHERE tn_id = ?1 AND identifier = ?2 AND kind = ?3 AND endpoint = ?4",
	)
	.bind(tn_id.0)
	.bind(identifier)
	.bind(kind.as_str())
	.bind(endpoint.unwrap_or(""))
	.fetch_one(db)
	.await;

	map_res(res, map_bucket_row)
}

pub(crate) async fn put_bucket(db: &SqlitePool, bucket: &RateBucket) -> WdResult<()> {
	sqlx::query(
		"INSERT OR REPLACE INTO rate_limits (tn_id, identifier, kind, endpoint, \
			tokens_remaining, last_refill, requests_count, window_start) \
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
	)
	.bind(bucket.tn_id.0)
	.bind(&*bucket.identifier)
	.bind(bucket.kind.as_str())
	.bind(bucket.endpoint.as_deref().unwrap_or(""))
	.bind(bucket.tokens_remaining)
	.bind(bucket.last_refill)
	.bind(bucket.requests_count)
	.bind(bucket.window_start.0)
	.execute(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	Ok(())
}

pub(crate) async fn delete_buckets(
	db: &SqlitePool,
	tn_id: TnId,
	identifier: &str,
	kind: IdentityKind,
	endpoint: Option<&str>,
) -> WdResult<u64> {
	let res = match endpoint {
		Some(endpoint) => {
			sqlx::query(
				"DELETE FROM rate_limits \
				WHERE tn_id = ?1 AND identifier = ?2 AND kind = ?3 AND endpoint = ?4",
			)
			.bind(tn_id.0)
			.bind(identifier)
			.bind(kind.as_str())
			.bind(endpoint)
			.execute(db)
			.await
		}
		None => {
			sqlx::query(
				"DELETE FROM rate_limits WHERE tn_id = ?1 AND identifier = ?2 AND kind = ?3",
			)
			.bind(tn_id.0)
			.bind(identifier)
			.bind(kind.as_str())
			.execute(db)
			.await
		}
	};

	Ok(res.inspect_err(inspect).or(Err(Error::DbError))?.rows_affected())
}

pub(crate) async fn bucket_stats(
	db: &SqlitePool,
	tn_id: TnId,
	kind: Option<IdentityKind>,
) -> WdResult<Vec<BucketStats>> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT kind, COUNT(*) AS identities, SUM(requests_count) AS total_requests, \
			AVG(tokens_remaining) AS avg_tokens_remaining \
		FROM rate_limits WHERE tn_id = ",
	);
	query.push_bind(tn_id.0);
	if let Some(kind) = kind {
		query.push(" AND kind = ").push_bind(kind.as_str());
	}
	query.push(" GROUP BY kind ORDER BY kind");

	let rows = query.build().fetch_all(db).await.inspect_err(inspect).or(Err(Error::DbError))?;

	collect_res(rows.iter().map(|row| {
		Ok(BucketStats {
			kind: parse_col("kind", row.try_get("kind")?)?,
			identities: row.try_get("identities")?,
			total_requests: row.try_get("total_requests")?,
			avg_tokens_remaining: row.try_get("avg_tokens_remaining")?,
		})
	}))
}

pub(crate) async fn cleanup_buckets(
	db: &SqlitePool,
	tn_id: TnId,
	older_than: Timestamp,
) -> WdResult<u64> {
	let res = sqlx::query("DELETE FROM rate_limits WHERE tn_id = ?1 AND window_start < ?2")
		.bind(tn_id.0)
		.bind(older_than.0)
		.execute(db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

	Ok(res.rows_affected())
}

// vim: ts=4
