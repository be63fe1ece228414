//! Tenant configuration queries

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use warden::guard_adapter::{GuardConfig, UpdateGuardConfig};
use warden::prelude::*;

const CONFIG_COLUMNS: &str = "enabled, global_limit, global_window, ip_limit, ip_window, \
	user_limit, user_window, burst_allowance, ddos_threshold, ddos_window, \
	brute_force_attempts, brute_force_window, block_duration, auto_block_enabled";

fn map_config_row(row: &SqliteRow) -> Result<GuardConfig, sqlx::Error> {
	Ok(GuardConfig {
		enabled: row.try_get("enabled")?,
		global_limit: row.try_get("global_limit")?,
		global_window: row.try_get("global_window")?,
		ip_limit: row.try_get("ip_limit")?,
		ip_window: row.try_get("ip_window")?,
		user_limit: row.try_get("user_limit")?,
		user_window: row.try_get("user_window")?,
		burst_allowance: row.try_get("burst_allowance")?,
		ddos_threshold: row.try_get("ddos_threshold")?,
		ddos_window: row.try_get("ddos_window")?,
		brute_force_attempts: row.try_get("brute_force_attempts")?,
		brute_force_window: row.try_get("brute_force_window")?,
		block_duration: row.try_get("block_duration")?,
		auto_block_enabled: row.try_get("auto_block_enabled")?,
	})
}

pub(crate) async fn read_config(db: &SqlitePool, tn_id: TnId) -> WdResult<GuardConfig> {
	let res = sqlx::query(&format!(
		"SELECT {} FROM rate_limit_config WHERE tn_id = ?1",
		CONFIG_COLUMNS
	))
	.bind(tn_id.0)
	.fetch_one(db)
	.await;

	map_res(res, map_config_row)
}

pub(crate) async fn create_config(
	db: &SqlitePool,
	tn_id: TnId,
	config: &GuardConfig,
) -> WdResult<()> {
	sqlx::query(
		"INSERT OR IGNORE INTO rate_limit_config (tn_id, enabled, global_limit, global_window, \
			ip_limit, ip_window, user_limit, user_window, burst_allowance, \
			ddos_threshold, ddos_window, brute_force_attempts, brute_force_window, \
			block_duration, auto_block_enabled) \
		VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
	)
	.bind(tn_id.0)
	.bind(config.enabled)
	.bind(config.global_limit)
	.bind(config.global_window)
	.bind(config.ip_limit)
	.bind(config.ip_window)
	.bind(config.user_limit)
	.bind(config.user_window)
	.bind(config.burst_allowance)
	.bind(config.ddos_threshold)
	.bind(config.ddos_window)
	.bind(config.brute_force_attempts)
	.bind(config.brute_force_window)
	.bind(config.block_duration)
	.bind(config.auto_block_enabled)
	.execute(db)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	Ok(())
}

/// Read-modify-write inside a transaction so concurrent patches cannot
/// interleave.
pub(crate) async fn update_config(
	db: &SqlitePool,
	tn_id: TnId,
	update: &UpdateGuardConfig,
) -> WdResult<GuardConfig> {
	let mut tx = db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;

	let res = sqlx::query(&format!(
		"SELECT {} FROM rate_limit_config WHERE tn_id = ?1",
		CONFIG_COLUMNS
	))
	.bind(tn_id.0)
	.fetch_one(&mut *tx)
	.await;
	let mut config = map_res(res, map_config_row)?;

	update.apply(&mut config);

	sqlx::query(
		"UPDATE rate_limit_config SET enabled = ?2, global_limit = ?3, global_window = ?4, \
			ip_limit = ?5, ip_window = ?6, user_limit = ?7, user_window = ?8, \
			burst_allowance = ?9, ddos_threshold = ?10, ddos_window = ?11, \
			brute_force_attempts = ?12, brute_force_window = ?13, block_duration = ?14, \
			auto_block_enabled = ?15 \
		WHERE tn_id = ?1",
	)
	.bind(tn_id.0)
	.bind(config.enabled)
	.bind(config.global_limit)
	.bind(config.global_window)
	.bind(config.ip_limit)
	.bind(config.ip_window)
	.bind(config.user_limit)
	.bind(config.user_window)
	.bind(config.burst_allowance)
	.bind(config.ddos_threshold)
	.bind(config.ddos_window)
	.bind(config.brute_force_attempts)
	.bind(config.brute_force_window)
	.bind(config.block_duration)
	.bind(config.auto_block_enabled)
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.or(Err(Error::DbError))?;

	tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;

	Ok(config)
}

pub(crate) async fn list_tenants(db: &SqlitePool) -> WdResult<Vec<TnId>> {
	let rows = sqlx::query("SELECT tn_id FROM rate_limit_config ORDER BY tn_id")
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

	collect_res(rows.iter().map(|row| row.try_get("tn_id").map(TnId)))
}

// vim: ts=4
