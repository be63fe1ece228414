//! In-Memory Guard Adapter
//!
//! HashMap-backed implementation of [`GuardAdapter`]. Nothing survives a
//! restart, which makes it useful for tests and for embedding the guard
//! without a database; production deployments want the sqlite adapter.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;

use warden_types::guard_adapter::{
	BlockWrite, BlockedIp, BucketStats, CleanupCounts, GuardAdapter, GuardConfig, IdentityKind,
	ListViolationsOptions, RateBucket, UpdateGuardConfig, Violation, WhitelistEntry,
};

use crate::prelude::*;

type BucketKey = (TnId, String, IdentityKind, Option<String>);

#[derive(Debug, Default)]
struct State {
	configs: HashMap<TnId, GuardConfig>,
	buckets: HashMap<BucketKey, RateBucket>,
	blocks: HashMap<(TnId, IpAddr), BlockedIp>,
	whitelist: HashMap<(TnId, IpAddr), WhitelistEntry>,
	violations: Vec<Violation>,
}

#[derive(Debug, Default)]
pub struct MemoryGuardAdapter {
	state: RwLock<State>,
}

impl MemoryGuardAdapter {
	pub fn new() -> Self {
		Self::default()
	}
}

fn bucket_key(bucket: &RateBucket) -> BucketKey {
	(
		bucket.tn_id,
		bucket.identifier.to_string(),
		bucket.kind,
		bucket.endpoint.as_deref().map(str::to_string),
	)
}

#[async_trait]
impl GuardAdapter for MemoryGuardAdapter {
	// Configuration //
	//***************//

	async fn read_config(&self, tn_id: TnId) -> WdResult<GuardConfig> {
		self.state.read().configs.get(&tn_id).cloned().ok_or(Error::NotFound)
	}

	async fn create_config(&self, tn_id: TnId, config: &GuardConfig) -> WdResult<()> {
		self.state.write().configs.entry(tn_id).or_insert_with(|| config.clone());
		Ok(())
	}

	async fn update_config(
		&self,
		tn_id: TnId,
		update: &UpdateGuardConfig,
	) -> WdResult<GuardConfig> {
		let mut state = self.state.write();
		let config = state.configs.get_mut(&tn_id).ok_or(Error::NotFound)?;
		update.apply(config);
		Ok(config.clone())
	}

	async fn list_tenants(&self) -> WdResult<Vec<TnId>> {
		let mut tenants: Vec<TnId> = self.state.read().configs.keys().copied().collect();
		tenants.sort_by_key(|t| t.0);
		Ok(tenants)
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
		let key = (tn_id, identifier.to_string(), kind, endpoint.map(str::to_string));
		self.state.read().buckets.get(&key).cloned().ok_or(Error::NotFound)
	}

	async fn put_bucket(&self, bucket: &RateBucket) -> WdResult<()> {
		self.state.write().buckets.insert(bucket_key(bucket), bucket.clone());
		Ok(())
	}

	async fn delete_buckets(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<u64> {
		let mut state = self.state.write();
		let before = state.buckets.len();
		state.buckets.retain(|(t, id, k, ep), _| {
			!(*t == tn_id
				&& id == identifier
				&& *k == kind
				&& (endpoint.is_none() || ep.as_deref() == endpoint))
		});
		Ok((before - state.buckets.len()) as u64)
	}

	async fn bucket_stats(
		&self,
		tn_id: TnId,
		kind: Option<IdentityKind>,
	) -> WdResult<Vec<BucketStats>> {
		let state = self.state.read();
		let mut grouped: HashMap<IdentityKind, (i64, i64, i64)> = HashMap::new();

		for bucket in state.buckets.values() {
			if bucket.tn_id != tn_id {
				continue;
			}
			if kind.is_some_and(|k| k != bucket.kind) {
				continue;
			}
			let entry = grouped.entry(bucket.kind).or_default();
			entry.0 += 1;
			entry.1 += bucket.requests_count;
			entry.2 += bucket.tokens_remaining;
		}

		let mut stats: Vec<BucketStats> = grouped
			.into_iter()
			.map(|(kind, (identities, total_requests, tokens_sum))| BucketStats {
				kind,
				identities,
				total_requests,
				avg_tokens_remaining: tokens_sum as f64 / identities as f64,
			})
			.collect();
		stats.sort_by_key(|s| s.kind.as_str());
		Ok(stats)
	}

	async fn cleanup_buckets(&self, tn_id: TnId, older_than: Timestamp) -> WdResult<u64> {
		let mut state = self.state.write();
		let before = state.buckets.len();
		state
			.buckets
			.retain(|(t, ..), bucket| !(*t == tn_id && bucket.window_start < older_than));
		Ok((before - state.buckets.len()) as u64)
	}

	// Blocked IPs //
	//*************//

	async fn list_active_blocks(&self, now: Timestamp) -> WdResult<Vec<BlockedIp>> {
		Ok(self
			.state
			.read()
			.blocks
			.values()
			.filter(|b| !b.is_expired(now))
			.cloned()
			.collect())
	}

	async fn list_blocks(&self, tn_id: TnId) -> WdResult<Vec<BlockedIp>> {
		let mut blocks: Vec<BlockedIp> = self
			.state
			.read()
			.blocks
			.values()
			.filter(|b| b.tn_id == tn_id)
			.cloned()
			.collect();
		blocks.sort_by_key(|b| std::cmp::Reverse(b.blocked_at));
		Ok(blocks)
	}

	async fn upsert_block(&self, block: &BlockedIp) -> WdResult<BlockWrite> {
		let mut state = self.state.write();
		match state.blocks.get_mut(&(block.tn_id, block.ip)) {
			Some(existing) => {
				let violation_count = existing.violation_count + 1;
				*existing = BlockedIp { violation_count, ..block.clone() };
				Ok(BlockWrite { created: false, violation_count })
			}
			None => {
				state.blocks.insert((block.tn_id, block.ip), block.clone());
				Ok(BlockWrite { created: true, violation_count: block.violation_count })
			}
		}
	}

	async fn delete_block(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		Ok(self.state.write().blocks.remove(&(tn_id, ip)).is_some())
	}

	// Whitelist //
	//***********//

	async fn list_active_whitelist(&self, now: Timestamp) -> WdResult<Vec<WhitelistEntry>> {
		Ok(self
			.state
			.read()
			.whitelist
			.values()
			.filter(|w| !w.is_expired(now))
			.cloned()
			.collect())
	}

	async fn list_whitelist(&self, tn_id: TnId) -> WdResult<Vec<WhitelistEntry>> {
		let mut entries: Vec<WhitelistEntry> = self
			.state
			.read()
			.whitelist
			.values()
			.filter(|w| w.tn_id == tn_id)
			.cloned()
			.collect();
		entries.sort_by_key(|w| std::cmp::Reverse(w.added_at));
		Ok(entries)
	}

	async fn put_whitelist(&self, entry: &WhitelistEntry) -> WdResult<()> {
		self.state.write().whitelist.insert((entry.tn_id, entry.ip), entry.clone());
		Ok(())
	}

	async fn delete_whitelist(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		Ok(self.state.write().whitelist.remove(&(tn_id, ip)).is_some())
	}

	// Violations //
	//************//

	async fn insert_violation(&self, violation: &Violation) -> WdResult<()> {
		self.state.write().violations.push(violation.clone());
		Ok(())
	}

	async fn list_violations(
		&self,
		tn_id: TnId,
		opts: &ListViolationsOptions,
	) -> WdResult<Vec<Violation>> {
		let state = self.state.read();
		let mut violations: Vec<Violation> = state
			.violations
			.iter()
			.filter(|v| v.tn_id == tn_id)
			.filter(|v| opts.limit_type.is_none_or(|lt| v.limit_type == lt))
			.filter(|v| opts.ip.is_none_or(|ip| v.ip == Some(ip)))
			.filter(|v| opts.since.is_none_or(|since| v.created_at >= since))
			.cloned()
			.collect();
		violations.sort_by_key(|v| std::cmp::Reverse(v.created_at));

		let offset = opts.offset.unwrap_or(0) as usize;
		let limit = opts.limit.unwrap_or(100) as usize;
		Ok(violations.into_iter().skip(offset).take(limit).collect())
	}

	// Housekeeping //
	//**************//

	async fn delete_expired(&self, now: Timestamp) -> WdResult<CleanupCounts> {
		let mut state = self.state.write();

		let blocks_before = state.blocks.len();
		state.blocks.retain(|_, b| !b.is_expired(now));
		let blocked = (blocks_before - state.blocks.len()) as u64;

		let whitelist_before = state.whitelist.len();
		state.whitelist.retain(|_, w| !w.is_expired(now));
		let whitelist = (whitelist_before - state.whitelist.len()) as u64;

		Ok(CleanupCounts { blocked, whitelist })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_types::guard_adapter::{BlockType, LimitType};

	fn block(tn_id: TnId, ip: &str, expires_at: Option<i64>) -> BlockedIp {
		BlockedIp {
			tn_id,
			ip: ip.parse().unwrap(),
			reason: "test".into(),
			block_type: BlockType::Manual,
			blocked_at: Timestamp(100),
			expires_at: expires_at.map(Timestamp),
			blocked_by: "admin".into(),
			auto_blocked: false,
			violation_count: 1,
		}
	}

	#[tokio::test]
	async fn test_upsert_block_escalates() {
		let adapter = MemoryGuardAdapter::new();
		let b = block(TnId(1), "10.0.0.1", Some(200));

		let first = adapter.upsert_block(&b).await.unwrap();
		assert!(first.created);
		assert_eq!(first.violation_count, 1);

		let again = adapter.upsert_block(&b).await.unwrap();
		assert!(!again.created);
		assert_eq!(again.violation_count, 2);

		// re-block refreshes the stored fields
		let refreshed = BlockedIp { expires_at: Some(Timestamp(999)), ..b };
		adapter.upsert_block(&refreshed).await.unwrap();
		let blocks = adapter.list_blocks(TnId(1)).await.unwrap();
		assert_eq!(blocks[0].expires_at, Some(Timestamp(999)));
		assert_eq!(blocks[0].violation_count, 3);
	}

	#[tokio::test]
	async fn test_delete_buckets_without_endpoint_clears_all() {
		let adapter = MemoryGuardAdapter::new();
		for endpoint in [None, Some("/api/a"), Some("/api/b")] {
			adapter
				.put_bucket(&RateBucket {
					tn_id: TnId(1),
					identifier: "1.2.3.4".into(),
					kind: IdentityKind::Ip,
					endpoint: endpoint.map(Into::into),
					tokens_remaining: 5,
					last_refill: 0,
					requests_count: 1,
					window_start: Timestamp(0),
				})
				.await
				.unwrap();
		}

		let removed = adapter
			.delete_buckets(TnId(1), "1.2.3.4", IdentityKind::Ip, Some("/api/a"))
			.await
			.unwrap();
		assert_eq!(removed, 1);

		let removed = adapter
			.delete_buckets(TnId(1), "1.2.3.4", IdentityKind::Ip, None)
			.await
			.unwrap();
		assert_eq!(removed, 2);
	}

	#[tokio::test]
	async fn test_delete_expired_counts_rows() {
		let adapter = MemoryGuardAdapter::new();
		adapter.upsert_block(&block(TnId(1), "10.0.0.1", Some(150))).await.unwrap();
		adapter.upsert_block(&block(TnId(1), "10.0.0.2", None)).await.unwrap();
		adapter
			.put_whitelist(&WhitelistEntry {
				tn_id: TnId(1),
				ip: "10.0.0.3".parse().unwrap(),
				description: None,
				added_by: "admin".into(),
				added_at: Timestamp(100),
				expires_at: Some(Timestamp(120)),
			})
			.await
			.unwrap();

		let counts = adapter.delete_expired(Timestamp(151)).await.unwrap();
		assert_eq!(counts.blocked, 1);
		assert_eq!(counts.whitelist, 1);

		// the permanent block survives
		assert_eq!(adapter.list_blocks(TnId(1)).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_list_violations_filters_and_orders() {
		let adapter = MemoryGuardAdapter::new();
		for (at, lt) in [(100, LimitType::Rate), (200, LimitType::Ddos), (300, LimitType::Rate)] {
			adapter
				.insert_violation(&Violation {
					tn_id: TnId(1),
					identifier: "1.2.3.4".into(),
					kind: IdentityKind::Ip,
					ip: Some("1.2.3.4".parse().unwrap()),
					endpoint: None,
					method: None,
					limit_type: lt,
					current_rate: 10.0,
					limit_rate: 5.0,
					created_at: Timestamp(at),
					action_taken: "throttled".into(),
				})
				.await
				.unwrap();
		}

		let opts =
			ListViolationsOptions { limit_type: Some(LimitType::Rate), ..Default::default() };
		let rate_only = adapter.list_violations(TnId(1), &opts).await.unwrap();
		assert_eq!(rate_only.len(), 2);
		// newest first
		assert_eq!(rate_only[0].created_at, Timestamp(300));

		let opts = ListViolationsOptions { since: Some(Timestamp(200)), ..Default::default() };
		assert_eq!(adapter.list_violations(TnId(1), &opts).await.unwrap().len(), 2);
	}
}

// vim: ts=4
