//! Blocked-IP and whitelist queries
//!
//! IPs are stored as TEXT in their canonical display form; `expires_at`
//! NULL marks a permanent row in both tables.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::net::IpAddr;

use crate::utils::*;
use warden::guard_adapter::{BlockWrite, BlockedIp, CleanupCounts, WhitelistEntry};
use warden::prelude::*;

const BLOCK_COLUMNS: &str = "tn_id, ip, reason, block_type, blocked_at, expires_at, \
	blocked_by, auto_blocked, violation_count";

fn map_block_row(row: &SqliteRow) -> Result<BlockedIp, sqlx::Error> {
	Ok(BlockedIp {
		tn_id: TnId(row.try_get("tn_id")?),
		ip: parse_col("ip", row.try_get("ip")?)?,
		reason: row.try_get::<&str, _>("reason")?.into(),
		block_type: parse_col("block_type", row.try_get("block_type")?)?,
		blocked_at: Timestamp(row.try_get("blocked_at")?),
		expires_at: row.try_get::<Option<i64>, _>("expires_at")?.map(Timestamp),
		blocked_by: row.try_get::<&str, _>("blocked_by")?.into(),
		auto_blocked: row.try_get("auto_blocked")?,
		violation_count: row.try_get("violation_count")?,
	})
}

fn map_whitelist_row(row: &SqliteRow) -> Result<WhitelistEntry, sqlx::Error> {
	Ok(WhitelistEntry {
		tn_id: TnId(row.try_get("tn_id")?),
		ip: parse_col("ip", row.try_get("ip")?)?,
		description: row.try_get::<Option<&str>, _>("description")?.map(Into::into),
		added_by: row.try_get::<&str, _>("added_by")?.into(),
		added_at: Timestamp(row.try_get("added_at")?),
		expires_at: row.try_get::<Option<i64>, _>("expires_at")?.map(Timestamp),
	})
}

// Blocked IPs //
//*************//

pub(crate) async fn list_active_blocks(
	db: &SqlitePool,
	now: Timestamp,
) -> WdResult<Vec<BlockedIp>> {
	let rows = sqlx::query(&format!(
		"SELECT {} FROM blocked_ips WHERE expires_at IS NULL OR expires_at > ?1",
		BLOCK_COLUMNS
	))
	.bind(now.0)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	collect_res(rows.iter().map(map_block_row))
}

pub(crate) async fn list_blocks(db: &SqlitePool, tn_id: TnId) -> WdResult<Vec<BlockedIp>> {
	let rows = sqlx::query(&format!(
		"SELECT {} FROM blocked_ips WHERE tn_id = ?1 ORDER BY blocked_at DESC",
		BLOCK_COLUMNS
	))
	.bind(tn_id.0)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	collect_res(rows.iter().map(map_block_row))
}

/// Insert-or-escalate inside a transaction: a repeat offender keeps its
/// row but takes the fresh fields and counts one more violation. The
/// count is incremented in SQL so interleaved escalations are never lost.
pub(crate) async fn upsert_block(db: &SqlitePool, block: &BlockedIp) -> WdResult<BlockWrite> {
	let mut tx = db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;

	let existing: Option<i64> =
		sqlx::query_scalar("SELECT 1 FROM blocked_ips WHERE tn_id = ?1 AND ip = ?2")
			.bind(block.tn_id.0)
			.bind(block.ip.to_string())
			.fetch_optional(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

	let write = match existing {
		Some(_) => {
			let res = sqlx::query(
				"UPDATE blocked_ips SET reason = ?3, block_type = ?4, blocked_at = ?5, \
					expires_at = ?6, blocked_by = ?7, auto_blocked = ?8, \
					violation_count = violation_count + 1 \
				WHERE tn_id = ?1 AND ip = ?2 RETURNING violation_count",
			)
			.bind(block.tn_id.0)
			.bind(block.ip.to_string())
			.bind(&*block.reason)
			.bind(block.block_type.as_str())
			.bind(block.blocked_at.0)
			.bind(block.expires_at.map(|at| at.0))
			.bind(&*block.blocked_by)
			.bind(block.auto_blocked)
			.fetch_one(&mut *tx)
			.await;
			let violation_count = map_res(res, |row| row.try_get("violation_count"))?;

			BlockWrite { created: false, violation_count }
		}
		None => {
			sqlx::query(&format!(
				"INSERT INTO blocked_ips ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
				BLOCK_COLUMNS
			))
			.bind(block.tn_id.0)
			.bind(block.ip.to_string())
			.bind(&*block.reason)
			.bind(block.block_type.as_str())
			.bind(block.blocked_at.0)
			.bind(block.expires_at.map(|at| at.0))
			.bind(&*block.blocked_by)
			.bind(block.auto_blocked)
			.bind(block.violation_count)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

			BlockWrite { created: true, violation_count: block.violation_count }
		}
	};

	tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;

	Ok(write)
}

pub(crate) async fn delete_block(db: &SqlitePool, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
	let res = sqlx::query("DELETE FROM blocked_ips WHERE tn_id = ?1 AND ip = ?2")
		.bind(tn_id.0)
		.bind(ip.to_string())
		.execute(db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

	Ok(res.rows_affected() > 0)
}

// Whitelist //
//***********//

pub(crate) async fn list_active_whitelist(
	db: &SqlitePool,
	now: Timestamp,
) -> WdResult<Vec<WhitelistEntry>> {
	let rows = sqlx::query(
		"SELECT tn_id, ip, description, added_by, added_at, expires_at \
		FROM ip_whitelist WHERE expires_at IS NULL OR expires_at > ?1",
	)
	.bind(now.0)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	collect_res(rows.iter().map(map_whitelist_row))
}

pub(crate) async fn list_whitelist(db: &SqlitePool, tn_id: TnId) -> WdResult<Vec<WhitelistEntry>> {
	let rows = sqlx::query(
		"SELECT tn_id, ip, description, added_by, added_at, expires_at \
		FROM ip_whitelist WHERE tn_id = ?1 ORDER BY added_at DESC",
	)
	.bind(tn_id.0)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	collect_res(rows.iter().map(map_whitelist_row))
}

pub(crate) async fn put_whitelist(db: &SqlitePool, entry: &WhitelistEntry) -> WdResult<()> {
	sqlx::query(
		"INSERT OR REPLACE INTO ip_whitelist (tn_id, ip, description, added_by, added_at, \
			expires_at) \
		VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
	)
	.bind(entry.tn_id.0)
	.bind(entry.ip.to_string())
	.bind(entry.description.as_deref())
	.bind(&*entry.added_by)
	.bind(entry.added_at.0)
	.bind(entry.expires_at.map(|at| at.0))
	.execute(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	Ok(())
}

pub(crate) async fn delete_whitelist(db: &SqlitePool, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
	let res = sqlx::query("DELETE FROM ip_whitelist WHERE tn_id = ?1 AND ip = ?2")
		.bind(tn_id.0)
		.bind(ip.to_string())
		.execute(db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

	Ok(res.rows_affected() > 0)
}

// Housekeeping //
//**************//

pub(crate) async fn delete_expired(db: &SqlitePool, now: Timestamp) -> WdResult<CleanupCounts> {
	let blocked = sqlx::query("DELETE FROM blocked_ips WHERE expires_at IS NOT NULL AND expires_at <= ?1")
		.bind(now.0)
		.execute(db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?
		.rows_affected();

	let whitelist =
		sqlx::query("DELETE FROM ip_whitelist WHERE expires_at IS NOT NULL AND expires_at <= ?1")
			.bind(now.0)
			.execute(db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?
			.rows_affected();

	Ok(CleanupCounts { blocked, whitelist })
}

// vim: ts=4
