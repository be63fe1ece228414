//! Adapter that stores the durable half of the abuse-protection state:
//! per-tenant configuration, rate-limit buckets, IP blocks, whitelist
//! entries, and violation audit records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;
use std::net::IpAddr;
use std::str::FromStr;

use crate::{
	prelude::*,
	types::{serialize_timestamp_iso, serialize_timestamp_iso_opt},
};

// Enums //
//*******//

/// What a rate-limit identity refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
	Ip,
	User,
	Global,
}

impl IdentityKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			IdentityKind::Ip => "ip",
			IdentityKind::User => "user",
			IdentityKind::Global => "global",
		}
	}
}

impl std::fmt::Display for IdentityKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for IdentityKind {
	type Err = Error;

	fn from_str(s: &str) -> WdResult<Self> {
		match s {
			"ip" => Ok(IdentityKind::Ip),
			"user" => Ok(IdentityKind::User),
			"global" => Ok(IdentityKind::Global),
			_ => Err(Error::ValidationError(format!("unknown identifier type: {}", s))),
		}
	}
}

/// How a block came to exist.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
	Manual,
	BruteForce,
	Ddos,
}

impl BlockType {
	pub fn as_str(&self) -> &'static str {
		match self {
			BlockType::Manual => "manual",
			BlockType::BruteForce => "brute_force",
			BlockType::Ddos => "ddos",
		}
	}
}

impl std::fmt::Display for BlockType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BlockType {
	type Err = Error;

	fn from_str(s: &str) -> WdResult<Self> {
		match s {
			"manual" => Ok(BlockType::Manual),
			"brute_force" => Ok(BlockType::BruteForce),
			"ddos" => Ok(BlockType::Ddos),
			_ => Err(Error::ValidationError(format!("unknown block type: {}", s))),
		}
	}
}

/// Which limit a violation record breached.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
	BruteForce,
	Ddos,
	Rate,
}

impl LimitType {
	pub fn as_str(&self) -> &'static str {
		match self {
			LimitType::BruteForce => "brute_force",
			LimitType::Ddos => "ddos",
			LimitType::Rate => "rate",
		}
	}
}

impl std::fmt::Display for LimitType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LimitType {
	type Err = Error;

	fn from_str(s: &str) -> WdResult<Self> {
		match s {
			"brute_force" => Ok(LimitType::BruteForce),
			"ddos" => Ok(LimitType::Ddos),
			"rate" => Ok(LimitType::Rate),
			_ => Err(Error::ValidationError(format!("unknown limit type: {}", s))),
		}
	}
}

// Configuration //
//***************//

/// Per-tenant protection configuration. One row per tenant, no history.
///
/// All fields are mandatory; defaults are applied exactly once when the
/// row is lazily created on first access.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
	pub enabled: bool,
	/// Requests per `global_window` for the tenant as a whole.
	pub global_limit: u32,
	pub global_window: u32,
	/// Requests per `ip_window` for a single client IP.
	pub ip_limit: u32,
	pub ip_window: u32,
	/// Requests per `user_window` for an authenticated user.
	pub user_limit: u32,
	pub user_window: u32,
	/// Extra tokens granted on top of the ip/user limits.
	pub burst_allowance: u32,
	/// Aggregate request count per `ddos_window` that arms the DDoS check.
	pub ddos_threshold: u32,
	pub ddos_window: u32,
	/// Login failures per `brute_force_window` that trigger a block.
	pub brute_force_attempts: u32,
	pub brute_force_window: u32,
	/// Seconds an automatic block lasts.
	pub block_duration: u32,
	pub auto_block_enabled: bool,
}

impl Default for GuardConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			global_limit: 10_000,
			global_window: 60,
			ip_limit: 100,
			ip_window: 60,
			user_limit: 300,
			user_window: 60,
			burst_allowance: 20,
			ddos_threshold: 1000,
			ddos_window: 60,
			brute_force_attempts: 5,
			brute_force_window: 300,
			block_duration: 3600,
			auto_block_enabled: true,
		}
	}
}

/// Partial configuration update; `None` fields are left untouched.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGuardConfig {
	pub enabled: Option<bool>,
	pub global_limit: Option<u32>,
	pub global_window: Option<u32>,
	pub ip_limit: Option<u32>,
	pub ip_window: Option<u32>,
	pub user_limit: Option<u32>,
	pub user_window: Option<u32>,
	pub burst_allowance: Option<u32>,
	pub ddos_threshold: Option<u32>,
	pub ddos_window: Option<u32>,
	pub brute_force_attempts: Option<u32>,
	pub brute_force_window: Option<u32>,
	pub block_duration: Option<u32>,
	pub auto_block_enabled: Option<bool>,
}

impl UpdateGuardConfig {
	/// Applies the patch to an existing configuration.
	pub fn apply(&self, config: &mut GuardConfig) {
		if let Some(v) = self.enabled {
			config.enabled = v;
		}
		if let Some(v) = self.global_limit {
			config.global_limit = v;
		}
		if let Some(v) = self.global_window {
			config.global_window = v;
		}
		if let Some(v) = self.ip_limit {
			config.ip_limit = v;
		}
		if let Some(v) = self.ip_window {
			config.ip_window = v;
		}
		if let Some(v) = self.user_limit {
			config.user_limit = v;
		}
		if let Some(v) = self.user_window {
			config.user_window = v;
		}
		if let Some(v) = self.burst_allowance {
			config.burst_allowance = v;
		}
		if let Some(v) = self.ddos_threshold {
			config.ddos_threshold = v;
		}
		if let Some(v) = self.ddos_window {
			config.ddos_window = v;
		}
		if let Some(v) = self.brute_force_attempts {
			config.brute_force_attempts = v;
		}
		if let Some(v) = self.brute_force_window {
			config.brute_force_window = v;
		}
		if let Some(v) = self.block_duration {
			config.block_duration = v;
		}
		if let Some(v) = self.auto_block_enabled {
			config.auto_block_enabled = v;
		}
	}
}

// Rate-limit buckets //
//********************//

/// Persisted token-bucket state for one identity.
///
/// `last_refill` is kept in epoch milliseconds so the floor-truncated
/// refill math keeps its original resolution; every other timestamp in
/// the system is second-resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct RateBucket {
	pub tn_id: TnId,
	pub identifier: Box<str>,
	pub kind: IdentityKind,
	pub endpoint: Option<Box<str>>,
	/// Invariant: `0 <= tokens_remaining <= limit`.
	pub tokens_remaining: i64,
	/// Epoch milliseconds of the last credited refill.
	pub last_refill: i64,
	/// Monotonic counter of admitted requests.
	pub requests_count: i64,
	pub window_start: Timestamp,
}

/// Aggregate bucket statistics for one identifier type.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
	pub kind: IdentityKind,
	pub identities: i64,
	pub total_requests: i64,
	pub avg_tokens_remaining: f64,
}

// Blocks and whitelist //
//**********************//

/// A blocked IP for one tenant.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIp {
	pub tn_id: TnId,
	pub ip: IpAddr,
	pub reason: Box<str>,
	pub block_type: BlockType,
	#[serde(serialize_with = "serialize_timestamp_iso")]
	pub blocked_at: Timestamp,
	/// `None` means a permanent block.
	#[serde(serialize_with = "serialize_timestamp_iso_opt")]
	pub expires_at: Option<Timestamp>,
	pub blocked_by: Box<str>,
	pub auto_blocked: bool,
	pub violation_count: u32,
}

impl BlockedIp {
	pub fn is_expired(&self, now: Timestamp) -> bool {
		self.expires_at.is_some_and(|exp| exp <= now)
	}
}

/// A whitelisted IP for one tenant. Always wins over blocks.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
	pub tn_id: TnId,
	pub ip: IpAddr,
	pub description: Option<Box<str>>,
	pub added_by: Box<str>,
	#[serde(serialize_with = "serialize_timestamp_iso")]
	pub added_at: Timestamp,
	#[serde(serialize_with = "serialize_timestamp_iso_opt")]
	pub expires_at: Option<Timestamp>,
}

impl WhitelistEntry {
	pub fn is_expired(&self, now: Timestamp) -> bool {
		self.expires_at.is_some_and(|exp| exp <= now)
	}
}

/// Result of an atomic block upsert.
#[derive(Clone, Copy, Debug)]
pub struct BlockWrite {
	/// False when the row already existed and only escalated.
	pub created: bool,
	pub violation_count: u32,
}

// Violations //
//************//

/// Append-only audit record written on every block or threshold breach.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
	pub tn_id: TnId,
	pub identifier: Box<str>,
	pub kind: IdentityKind,
	pub ip: Option<IpAddr>,
	pub endpoint: Option<Box<str>>,
	pub method: Option<Box<str>>,
	pub limit_type: LimitType,
	pub current_rate: f64,
	pub limit_rate: f64,
	#[serde(serialize_with = "serialize_timestamp_iso")]
	pub created_at: Timestamp,
	pub action_taken: Box<str>,
}

/// Filters for listing violations.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListViolationsOptions {
	pub limit_type: Option<LimitType>,
	pub ip: Option<IpAddr>,
	pub since: Option<Timestamp>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

/// Row counts removed by an expiry sweep.
#[derive(Clone, Copy, Debug, Default)]
pub struct CleanupCounts {
	pub blocked: u64,
	pub whitelist: u64,
}

// Adapter trait //
//***************//

/// A Warden guard adapter
///
/// Stores the durable protection state. The in-memory activity windows are
/// deliberately not part of this trait; losing them on restart is an
/// accepted tradeoff, while blocks, buckets, and configuration survive.
#[async_trait]
pub trait GuardAdapter: Debug + Send + Sync {
	/// # Configuration
	/// Reads the tenant configuration; `Error::NotFound` when absent.
	async fn read_config(&self, tn_id: TnId) -> WdResult<GuardConfig>;

	/// Inserts the tenant configuration; keeps an existing row untouched.
	async fn create_config(&self, tn_id: TnId, config: &GuardConfig) -> WdResult<()>;

	/// Applies a partial update and returns the resulting configuration.
	async fn update_config(
		&self,
		tn_id: TnId,
		update: &UpdateGuardConfig,
	) -> WdResult<GuardConfig>;

	/// Lists tenants that have a configuration row (sweep targets).
	async fn list_tenants(&self) -> WdResult<Vec<TnId>>;

	/// # Rate-limit buckets
	async fn read_bucket(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<RateBucket>;

	/// Inserts or replaces the bucket row for its identity.
	async fn put_bucket(&self, bucket: &RateBucket) -> WdResult<()>;

	/// Deletes matching buckets; all endpoints of the identity when
	/// `endpoint` is `None`. Returns the number of rows removed.
	async fn delete_buckets(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<u64>;

	/// Aggregate statistics grouped by identifier type.
	async fn bucket_stats(
		&self,
		tn_id: TnId,
		kind: Option<IdentityKind>,
	) -> WdResult<Vec<BucketStats>>;

	/// Deletes buckets not updated since the cutoff.
	async fn cleanup_buckets(&self, tn_id: TnId, older_than: Timestamp) -> WdResult<u64>;

	/// # Blocked IPs
	/// Non-expired blocks across all tenants, for cache warm-up.
	async fn list_active_blocks(&self, now: Timestamp) -> WdResult<Vec<BlockedIp>>;

	/// All blocks of one tenant, expired rows included.
	async fn list_blocks(&self, tn_id: TnId) -> WdResult<Vec<BlockedIp>>;

	/// Atomic insert-or-escalate: a new row starts with the block's
	/// violation count, an existing row takes the block's fields and
	/// increments its own `violation_count` by one.
	async fn upsert_block(&self, block: &BlockedIp) -> WdResult<BlockWrite>;

	/// Returns false when no row existed.
	async fn delete_block(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool>;

	/// # Whitelist
	async fn list_active_whitelist(&self, now: Timestamp) -> WdResult<Vec<WhitelistEntry>>;
	async fn list_whitelist(&self, tn_id: TnId) -> WdResult<Vec<WhitelistEntry>>;

	/// Inserts or replaces the whitelist row for (tenant, ip).
	async fn put_whitelist(&self, entry: &WhitelistEntry) -> WdResult<()>;

	/// Returns false when no row existed.
	async fn delete_whitelist(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool>;

	/// # Violations
	async fn insert_violation(&self, violation: &Violation) -> WdResult<()>;
	async fn list_violations(
		&self,
		tn_id: TnId,
		opts: &ListViolationsOptions,
	) -> WdResult<Vec<Violation>>;

	/// # Housekeeping
	/// Deletes expired block and whitelist rows.
	async fn delete_expired(&self, now: Timestamp) -> WdResult<CleanupCounts>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_kind_round_trips() {
		for kind in [IdentityKind::Ip, IdentityKind::User, IdentityKind::Global] {
			assert_eq!(kind.as_str().parse::<IdentityKind>().unwrap(), kind);
		}
		assert!("bogus".parse::<IdentityKind>().is_err());
	}

	#[test]
	fn block_type_round_trips() {
		for bt in [BlockType::Manual, BlockType::BruteForce, BlockType::Ddos] {
			assert_eq!(bt.as_str().parse::<BlockType>().unwrap(), bt);
		}
	}

	#[test]
	fn update_config_applies_only_set_fields() {
		let mut config = GuardConfig::default();
		let update = UpdateGuardConfig {
			ip_limit: Some(42),
			enabled: Some(false),
			..UpdateGuardConfig::default()
		};
		update.apply(&mut config);

		assert_eq!(config.ip_limit, 42);
		assert!(!config.enabled);
		// untouched fields keep their defaults
		assert_eq!(config.user_limit, GuardConfig::default().user_limit);
		assert_eq!(config.block_duration, GuardConfig::default().block_duration);
	}

	#[test]
	fn expiry_checks() {
		let block = BlockedIp {
			tn_id: TnId(1),
			ip: "10.0.0.1".parse().unwrap(),
			reason: "test".into(),
			block_type: BlockType::Manual,
			blocked_at: Timestamp(100),
			expires_at: Some(Timestamp(200)),
			blocked_by: "admin".into(),
			auto_blocked: false,
			violation_count: 1,
		};
		assert!(!block.is_expired(Timestamp(199)));
		assert!(block.is_expired(Timestamp(200)));

		let permanent = BlockedIp { expires_at: None, ..block };
		assert!(!permanent.is_expired(Timestamp(i64::MAX)));
	}

	#[test]
	fn config_serde_uses_camel_case() {
		let json = serde_json::to_value(GuardConfig::default()).unwrap();
		assert_eq!(json["ipLimit"], 100);
		assert_eq!(json["bruteForceAttempts"], 5);
		assert_eq!(json["autoBlockEnabled"], true);
	}
}

// vim: ts=4
