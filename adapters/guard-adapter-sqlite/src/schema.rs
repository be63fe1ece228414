//! Database schema initialization and migrations

use sqlx::{Sqlite, SqlitePool, Transaction};

/// Get the current database version from vars table
async fn get_db_version(tx: &mut Transaction<'_, Sqlite>) -> i64 {
	sqlx::query_scalar::<_, String>("SELECT value FROM vars WHERE key = 'db_version'")
		.fetch_optional(&mut **tx)
		.await
		.ok()
		.flatten()
		.and_then(|v| v.parse().ok())
		.unwrap_or(0)
}

/// Set the database version in vars table
async fn set_db_version(tx: &mut Transaction<'_, Sqlite>, version: i64) {
	let _ = sqlx::query("INSERT OR REPLACE INTO vars (key, value) VALUES ('db_version', ?)")
		.bind(version.to_string())
		.execute(&mut **tx)
		.await;
}

// Current schema version - update this when adding new migrations
const CURRENT_DB_VERSION: i64 = 1;

/// Initialize the database schema and run migrations
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Create vars table first (needed for version tracking)
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS vars (
			key text NOT NULL,
			value text NOT NULL,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch()),
			PRIMARY KEY(key)
		)",
	)
	.execute(&mut *tx)
	.await?;

	let version = get_db_version(&mut tx).await;

	// Schema creation - safe to run every time (uses IF NOT EXISTS)

	// Per-tenant protection configuration
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS rate_limit_config (
			tn_id integer NOT NULL,
			enabled boolean NOT NULL DEFAULT 1,
			global_limit integer NOT NULL,
			global_window integer NOT NULL,
			ip_limit integer NOT NULL,
			ip_window integer NOT NULL,
			user_limit integer NOT NULL,
			user_window integer NOT NULL,
			burst_allowance integer NOT NULL,
			ddos_threshold integer NOT NULL,
			ddos_window integer NOT NULL,
			brute_force_attempts integer NOT NULL,
			brute_force_window integer NOT NULL,
			block_duration integer NOT NULL,
			auto_block_enabled boolean NOT NULL DEFAULT 1,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch()),
			PRIMARY KEY(tn_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	// Token buckets. The empty-string endpoint marks the identity-wide
	// bucket; NULL would break the composite primary key.
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS rate_limits (
			tn_id integer NOT NULL,
			identifier text NOT NULL,
			kind text NOT NULL,
			endpoint text NOT NULL DEFAULT '',
			tokens_remaining integer NOT NULL,
			last_refill integer NOT NULL,
			requests_count integer NOT NULL DEFAULT 0,
			window_start integer NOT NULL,
			PRIMARY KEY(tn_id, identifier, kind, endpoint)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_rate_limits_window ON rate_limits(tn_id, window_start)",
	)
	.execute(&mut *tx)
	.await?;

	// Blocked IPs
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS blocked_ips (
			tn_id integer NOT NULL,
			ip text NOT NULL,
			reason text NOT NULL,
			block_type text NOT NULL,
			blocked_at integer NOT NULL,
			expires_at integer,
			blocked_by text NOT NULL,
			auto_blocked boolean NOT NULL DEFAULT 0,
			violation_count integer NOT NULL DEFAULT 1,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch()),
			PRIMARY KEY(tn_id, ip)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_blocked_ips_expires ON blocked_ips(expires_at) \
			WHERE expires_at IS NOT NULL",
	)
	.execute(&mut *tx)
	.await?;

	// Whitelist
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS ip_whitelist (
			tn_id integer NOT NULL,
			ip text NOT NULL,
			description text,
			added_by text NOT NULL,
			added_at integer NOT NULL,
			expires_at integer,
			created_at INTEGER DEFAULT (unixepoch()),
			updated_at INTEGER DEFAULT (unixepoch()),
			PRIMARY KEY(tn_id, ip)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_ip_whitelist_expires ON ip_whitelist(expires_at) \
			WHERE expires_at IS NOT NULL",
	)
	.execute(&mut *tx)
	.await?;

	// Violation audit log (append-only; created_at comes from the caller's
	// clock so listings stay deterministic under test)
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS rate_limit_violations (
			violation_id integer PRIMARY KEY AUTOINCREMENT,
			tn_id integer NOT NULL,
			identifier text NOT NULL,
			kind text NOT NULL,
			ip text,
			endpoint text,
			method text,
			limit_type text NOT NULL,
			current_rate real NOT NULL,
			limit_rate real NOT NULL,
			action_taken text NOT NULL,
			created_at integer NOT NULL
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_violations_tnid_created \
			ON rate_limit_violations(tn_id, created_at)",
	)
	.execute(&mut *tx)
	.await?;

	// Triggers for automatic updated_at on INSERT
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS vars_insert_at AFTER INSERT ON vars FOR EACH ROW \
			BEGIN UPDATE vars SET updated_at = unixepoch() WHERE key = NEW.key; END",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS rate_limit_config_insert_at AFTER INSERT ON rate_limit_config FOR EACH ROW \
			BEGIN UPDATE rate_limit_config SET updated_at = unixepoch() WHERE tn_id = NEW.tn_id; END",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS blocked_ips_insert_at AFTER INSERT ON blocked_ips FOR EACH ROW \
			BEGIN UPDATE blocked_ips SET updated_at = unixepoch() WHERE tn_id = NEW.tn_id AND ip = NEW.ip; END",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS ip_whitelist_insert_at AFTER INSERT ON ip_whitelist FOR EACH ROW \
			BEGIN UPDATE ip_whitelist SET updated_at = unixepoch() WHERE tn_id = NEW.tn_id AND ip = NEW.ip; END",
	)
	.execute(&mut *tx)
	.await?;

	// Triggers for automatic updated_at on UPDATE
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS vars_updated_at AFTER UPDATE ON vars FOR EACH ROW \
			BEGIN UPDATE vars SET updated_at = unixepoch() WHERE key = NEW.key; END",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS rate_limit_config_updated_at AFTER UPDATE ON rate_limit_config FOR EACH ROW \
			BEGIN UPDATE rate_limit_config SET updated_at = unixepoch() WHERE tn_id = NEW.tn_id; END",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS blocked_ips_updated_at AFTER UPDATE ON blocked_ips FOR EACH ROW \
			BEGIN UPDATE blocked_ips SET updated_at = unixepoch() WHERE tn_id = NEW.tn_id AND ip = NEW.ip; END",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TRIGGER IF NOT EXISTS ip_whitelist_updated_at AFTER UPDATE ON ip_whitelist FOR EACH ROW \
			BEGIN UPDATE ip_whitelist SET updated_at = unixepoch() WHERE tn_id = NEW.tn_id AND ip = NEW.ip; END",
	)
	.execute(&mut *tx)
	.await?;

	// Fresh database: stamp the current version
	if version == 0 {
		set_db_version(&mut tx, CURRENT_DB_VERSION).await;
	}

	tx.commit().await?;

	Ok(())
}

// vim: ts=4
