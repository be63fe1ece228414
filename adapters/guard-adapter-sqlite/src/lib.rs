//! SQLite-backed guard adapter for Warden.
//!
//! Persists the durable half of the abuse-protection state: per-tenant
//! configuration, token-bucket rows, IP blocks, whitelist entries, and
//! the violation audit log. Queries live in one module per table group;
//! this file holds the pool setup and the [`GuardAdapter`] impl that
//! delegates to them.

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::net::IpAddr;
use std::path::Path;

use warden::guard_adapter::{
	BlockWrite, BlockedIp, BucketStats, CleanupCounts, GuardAdapter, GuardConfig, IdentityKind,
	ListViolationsOptions, RateBucket, UpdateGuardConfig, Violation, WhitelistEntry,
};
use warden::prelude::*;

mod block;
mod bucket;
mod config;
mod schema;
mod utils;
mod violation;

use crate::utils::inspect;

#[derive(Debug)]
pub struct GuardAdapterSqlite {
	db: SqlitePool,
}

impl GuardAdapterSqlite {
	/// Opens the database at `path`, creating it and the schema when
	/// missing, and runs any pending migrations.
	pub async fn new(path: impl AsRef<Path>) -> WdResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		schema::init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;

		Ok(Self { db })
	}
}

#[async_trait]
impl GuardAdapter for GuardAdapterSqlite {
	// Configuration //
	//***************//

	async fn read_config(&self, tn_id: TnId) -> WdResult<GuardConfig> {
		config::read_config(&self.db, tn_id).await
	}

	async fn create_config(&self, tn_id: TnId, config: &GuardConfig) -> WdResult<()> {
		config::create_config(&self.db, tn_id, config).await
	}

	async fn update_config(
		&self,
		tn_id: TnId,
		update: &UpdateGuardConfig,
	) -> WdResult<GuardConfig> {
		config::update_config(&self.db, tn_id, update).await
	}

	async fn list_tenants(&self) -> WdResult<Vec<TnId>> {
		config::list_tenants(&self.db).await
	}

	// Rate-limit buckets //
	//********************//

	async fn read_bucket(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<RateBucket> {
		bucket::read_bucket(&self.db, tn_id, identifier, kind, endpoint).await
	}

	async fn put_bucket(&self, bucket: &RateBucket) -> WdResult<()> {
		bucket::put_bucket(&self.db, bucket).await
	}

	async fn delete_buckets(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<u64> {
		bucket::delete_buckets(&self.db, tn_id, identifier, kind, endpoint).await
	}

	async fn bucket_stats(
		&self,
		tn_id: TnId,
		kind: Option<IdentityKind>,
	) -> WdResult<Vec<BucketStats>> {
		bucket::bucket_stats(&self.db, tn_id, kind).await
	}

	async fn cleanup_buckets(&self, tn_id: TnId, older_than: Timestamp) -> WdResult<u64> {
		bucket::cleanup_buckets(&self.db, tn_id, older_than).await
	}

	// Blocked IPs //
	//*************//

	async fn list_active_blocks(&self, now: Timestamp) -> WdResult<Vec<BlockedIp>> {
		block::list_active_blocks(&self.db, now).await
	}

	async fn list_blocks(&self, tn_id: TnId) -> WdResult<Vec<BlockedIp>> {
		block::list_blocks(&self.db, tn_id).await
	}

	async fn upsert_block(&self, block: &BlockedIp) -> WdResult<BlockWrite> {
		block::upsert_block(&self.db, block).await
	}

	async fn delete_block(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		block::delete_block(&self.db, tn_id, ip).await
	}

	// Whitelist //
	//***********//

	async fn list_active_whitelist(&self, now: Timestamp) -> WdResult<Vec<WhitelistEntry>> {
		block::list_active_whitelist(&self.db, now).await
	}

	async fn list_whitelist(&self, tn_id: TnId) -> WdResult<Vec<WhitelistEntry>> {
		block::list_whitelist(&self.db, tn_id).await
	}

	async fn put_whitelist(&self, entry: &WhitelistEntry) -> WdResult<()> {
		block::put_whitelist(&self.db, entry).await
	}

	async fn delete_whitelist(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		block::delete_whitelist(&self.db, tn_id, ip).await
	}

	// Violations //
	//************//

	async fn insert_violation(&self, violation: &Violation) -> WdResult<()> {
		violation::insert_violation(&self.db, violation).await
	}

	async fn list_violations(
		&self,
		tn_id: TnId,
		opts: &ListViolationsOptions,
	) -> WdResult<Vec<Violation>> {
		violation::list_violations(&self.db, tn_id, opts).await
	}

	// Housekeeping //
	//**************//

	async fn delete_expired(&self, now: Timestamp) -> WdResult<CleanupCounts> {
		block::delete_expired(&self.db, now).await
	}
}

// vim: ts=4
