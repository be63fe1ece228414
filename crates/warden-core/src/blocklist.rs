//! Block and Whitelist Manager
//!
//! Tenant-scoped IP blocking with an always-warm in-process cache. The
//! request path never touches storage: `is_blocked` and `is_whitelisted`
//! answer from the cache alone, so a database outage cannot stall request
//! admission. Writes go to storage first and only then to the cache; a
//! failed write leaves both sides unchanged.
//!
//! Expired entries are evicted from the cache lazily on read. The stored
//! rows stay behind until the periodic cleanup removes them, which keeps
//! the audit trail queryable in the meantime.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use warden_types::guard_adapter::{
	BlockType, BlockedIp, CleanupCounts, GuardAdapter, WhitelistEntry,
};

use crate::events::{EventBus, GuardEvent};
use crate::prelude::*;

/// What a block request ended up doing.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockOutcome {
	/// New block written.
	Created { expires_at: Option<Timestamp> },
	/// The IP was already blocked; the violation count went up.
	Escalated { violation_count: u32 },
	/// The IP is whitelisted; nothing was written.
	Whitelisted,
}

/// Cached view of all active blocks and whitelist entries.
pub struct BlockManager {
	adapter: Arc<dyn GuardAdapter>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	blocks: RwLock<HashMap<(TnId, IpAddr), BlockedIp>>,
	whitelist: RwLock<HashMap<(TnId, IpAddr), WhitelistEntry>>,
}

impl BlockManager {
	pub fn new(adapter: Arc<dyn GuardAdapter>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
		Self {
			adapter,
			clock,
			events,
			blocks: RwLock::new(HashMap::new()),
			whitelist: RwLock::new(HashMap::new()),
		}
	}

	/// Replaces both caches with the active rows from storage.
	pub async fn load(&self) -> WdResult<()> {
		let now = self.clock.now();

		let blocks = self.adapter.list_active_blocks(now).await?;
		let whitelist = self.adapter.list_active_whitelist(now).await?;
		info!("Loaded {} active block(s), {} whitelist entr(ies)", blocks.len(), whitelist.len());

		*self.blocks.write() =
			blocks.into_iter().map(|b| ((b.tn_id, b.ip), b)).collect();
		*self.whitelist.write() =
			whitelist.into_iter().map(|w| ((w.tn_id, w.ip), w)).collect();
		Ok(())
	}

	/// Active block for the IP, if any. Whitelisted IPs are never blocked.
	/// Cache-only; cannot fail.
	pub fn is_blocked(&self, tn_id: TnId, ip: IpAddr) -> Option<BlockedIp> {
		if self.is_whitelisted(tn_id, ip) {
			return None;
		}

		let now = self.clock.now();
		let mut blocks = self.blocks.write();
		match blocks.get(&(tn_id, ip)) {
			Some(block) if block.is_expired(now) => {
				blocks.remove(&(tn_id, ip));
				None
			}
			Some(block) => Some(block.clone()),
			None => None,
		}
	}

	/// Cache-only; cannot fail.
	pub fn is_whitelisted(&self, tn_id: TnId, ip: IpAddr) -> bool {
		let now = self.clock.now();
		let mut whitelist = self.whitelist.write();
		match whitelist.get(&(tn_id, ip)) {
			Some(entry) if entry.is_expired(now) => {
				whitelist.remove(&(tn_id, ip));
				false
			}
			Some(_) => true,
			None => false,
		}
	}

	/// Blocks an IP for `duration` seconds (`None` blocks permanently).
	///
	/// Blocking an already-blocked IP escalates its violation count and
	/// refreshes the block metadata. Blocking a whitelisted IP writes
	/// nothing and reports [`BlockOutcome::Whitelisted`].
	pub async fn block_ip(
		&self,
		tn_id: TnId,
		ip: IpAddr,
		reason: &str,
		block_type: BlockType,
		duration: Option<u32>,
		blocked_by: &str,
		auto_blocked: bool,
	) -> WdResult<BlockOutcome> {
		if self.is_whitelisted(tn_id, ip) {
			info!("Not blocking whitelisted IP {} on tenant {}", ip, tn_id);
			return Ok(BlockOutcome::Whitelisted);
		}

		let now = self.clock.now();
		let mut block = BlockedIp {
			tn_id,
			ip,
			reason: reason.into(),
			block_type,
			blocked_at: now,
			expires_at: duration.map(|d| Timestamp(now.0 + i64::from(d))),
			blocked_by: blocked_by.into(),
			auto_blocked,
			violation_count: 1,
		};

		// Storage first; the cache must never claim a block that was lost.
		let write = self.adapter.upsert_block(&block).await?;
		block.violation_count = write.violation_count;

		let expires_at = block.expires_at;
		self.blocks.write().insert((tn_id, ip), block);

		self.events.emit(GuardEvent::IpBlocked {
			tn_id,
			ip,
			block_type,
			reason: reason.into(),
			expires_at,
		});

		if write.created {
			info!("Blocked IP {} on tenant {}: {}", ip, tn_id, reason);
			Ok(BlockOutcome::Created { expires_at })
		} else {
			info!(
				"Escalated block of IP {} on tenant {} to {} violation(s)",
				ip, tn_id, write.violation_count
			);
			Ok(BlockOutcome::Escalated { violation_count: write.violation_count })
		}
	}

	/// Returns false when the IP was not blocked.
	pub async fn unblock_ip(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		let existed = self.adapter.delete_block(tn_id, ip).await?;
		self.blocks.write().remove(&(tn_id, ip));

		if existed {
			info!("Unblocked IP {} on tenant {}", ip, tn_id);
			self.events.emit(GuardEvent::IpUnblocked { tn_id, ip });
		}
		Ok(existed)
	}

	/// Whitelists an IP, force-unblocking it if currently blocked.
	pub async fn add_to_whitelist(
		&self,
		tn_id: TnId,
		ip: IpAddr,
		description: Option<&str>,
		added_by: &str,
		expires_at: Option<Timestamp>,
	) -> WdResult<WhitelistEntry> {
		let entry = WhitelistEntry {
			tn_id,
			ip,
			description: description.map(Into::into),
			added_by: added_by.into(),
			added_at: self.clock.now(),
			expires_at,
		};

		self.adapter.put_whitelist(&entry).await?;
		self.whitelist.write().insert((tn_id, ip), entry.clone());
		info!("Whitelisted IP {} on tenant {}", ip, tn_id);

		// an IP cannot be blocked and whitelisted at once
		if self.adapter.delete_block(tn_id, ip).await? {
			self.blocks.write().remove(&(tn_id, ip));
			self.events.emit(GuardEvent::IpUnblocked { tn_id, ip });
		}

		Ok(entry)
	}

	/// Returns false when the IP was not whitelisted.
	pub async fn remove_from_whitelist(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		let existed = self.adapter.delete_whitelist(tn_id, ip).await?;
		self.whitelist.write().remove(&(tn_id, ip));
		Ok(existed)
	}

	/// Active blocks for one tenant, newest first.
	pub async fn list_blocked(&self, tn_id: TnId) -> WdResult<Vec<BlockedIp>> {
		let now = self.clock.now();
		let blocks = self.adapter.list_blocks(tn_id).await?;
		Ok(blocks.into_iter().filter(|b| !b.is_expired(now)).collect())
	}

	/// Active whitelist entries for one tenant, newest first.
	pub async fn list_whitelisted(&self, tn_id: TnId) -> WdResult<Vec<WhitelistEntry>> {
		let now = self.clock.now();
		let entries = self.adapter.list_whitelist(tn_id).await?;
		Ok(entries.into_iter().filter(|w| !w.is_expired(now)).collect())
	}

	/// Number of active blocks a tenant has, from the cache.
	pub fn active_block_count(&self, tn_id: TnId) -> usize {
		let now = self.clock.now();
		self.blocks
			.read()
			.values()
			.filter(|b| b.tn_id == tn_id && !b.is_expired(now))
			.count()
	}

	/// Number of active whitelist entries a tenant has, from the cache.
	pub fn active_whitelist_count(&self, tn_id: TnId) -> usize {
		let now = self.clock.now();
		self.whitelist
			.read()
			.values()
			.filter(|w| w.tn_id == tn_id && !w.is_expired(now))
			.count()
	}

	/// Deletes expired rows from storage and re-warms the caches.
	pub async fn cleanup(&self) -> WdResult<CleanupCounts> {
		let counts = self.adapter.delete_expired(self.clock.now()).await?;
		if counts.blocked > 0 || counts.whitelist > 0 {
			debug!(
				"Removed {} expired block(s), {} whitelist entr(ies)",
				counts.blocked, counts.whitelist
			);
		}
		self.load().await?;
		Ok(counts)
	}
}

impl std::fmt::Debug for BlockManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BlockManager")
			.field("blocks", &self.blocks.read().len())
			.field("whitelist", &self.whitelist.read().len())
			.finish()
	}
}


// vim: ts=4
