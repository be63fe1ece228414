//! Warden Facade
//!
//! Owns one instance of every protection component and exposes the
//! request-path and admin surface the rest of an application talks to.
//! The request path (`check_request`) is infallible by construction:
//! tracking is in-memory, block and whitelist reads are cache-only, and
//! the rate limiter fails open on storage trouble.

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

use warden_types::clock::SystemClock;
use warden_types::guard_adapter::{
	BlockType, BlockedIp, BucketStats, CleanupCounts, GuardAdapter, GuardConfig, IdentityKind,
	ListViolationsOptions, UpdateGuardConfig, Violation, WhitelistEntry,
};

use crate::blocklist::{BlockManager, BlockOutcome};
use crate::brute_force::{AttemptOutcome, BruteForceDetector};
use crate::config::ConfigManager;
use crate::ddos::{DdosAssessment, DdosProtector};
use crate::events::EventBus;
use crate::limiter::{CheckOptions, RateLimitDecision, RateLimiter};
use crate::prelude::*;
use crate::tracker::{ActivityTracker, IpActivity, Suspicion};

/// Identifier of the tenant-wide rate bucket.
const GLOBAL_IDENTIFIER: &str = "global";
/// Buckets idle longer than this are dropped by `run_cleanup`.
const BUCKET_RETENTION_SECS: i64 = 86_400;

/// Everything the guard wants to know about one request.
#[derive(Clone, Copy, Debug)]
pub struct RequestContext<'a> {
	pub ip: IpAddr,
	pub endpoint: &'a str,
	pub method: &'a str,
	pub user_agent: Option<&'a str>,
	/// Authenticated principal, when known.
	pub user_id: Option<&'a str>,
}

/// Admission decision for one request.
#[derive(Clone, Debug)]
pub enum RequestVerdict {
	/// Admitted. The decision carries the per-IP budget for response
	/// headers; it is `None` for whitelisted clients, which bypass the
	/// limiter entirely.
	Allowed { decision: Option<RateLimitDecision> },
	/// The client IP is blocked.
	Blocked { block: BlockedIp },
	/// A rate limit rejected the request.
	RateLimited { decision: RateLimitDecision },
}

impl RequestVerdict {
	pub fn is_allowed(&self) -> bool {
		matches!(self, RequestVerdict::Allowed { .. })
	}
}

/// Point-in-time counters for one tenant.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStats {
	pub active_blocks: usize,
	pub whitelist_entries: usize,
	/// (ip, endpoint) keys the tracker currently holds, instance-wide.
	pub tracked_keys: usize,
	/// Requests denied by this process since start, all tenants.
	pub total_limited: u64,
	pub buckets: Vec<BucketStats>,
}

/// What one housekeeping pass removed.
#[derive(Clone, Copy, Debug, Default)]
pub struct CleanupSummary {
	pub expired: CleanupCounts,
	pub buckets: u64,
	pub tracker_samples: usize,
	pub tracker_keys: usize,
	pub attempt_keys: usize,
}

/// The abuse-protection subsystem: activity tracking, rate limiting,
/// blocking, brute-force and DDoS detection behind one handle.
pub struct Warden {
	adapter: Arc<dyn GuardAdapter>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	config: Arc<ConfigManager>,
	tracker: Arc<ActivityTracker>,
	blocks: Arc<BlockManager>,
	limiter: RateLimiter,
	brute_force: BruteForceDetector,
	ddos: DdosProtector,
}

impl Warden {
	pub fn new(adapter: Arc<dyn GuardAdapter>) -> Self {
		Self::with_clock(adapter, Arc::new(SystemClock))
	}

	pub fn with_clock(adapter: Arc<dyn GuardAdapter>, clock: Arc<dyn Clock>) -> Self {
		let events = EventBus::new();
		let config = Arc::new(ConfigManager::new(adapter.clone(), clock.clone()));
		let tracker = Arc::new(ActivityTracker::new(clock.clone()));
		let blocks =
			Arc::new(BlockManager::new(adapter.clone(), clock.clone(), events.clone()));
		let limiter =
			RateLimiter::new(adapter.clone(), config.clone(), clock.clone(), events.clone());
		let brute_force = BruteForceDetector::new(
			adapter.clone(),
			config.clone(),
			blocks.clone(),
			clock.clone(),
			events.clone(),
		);
		let ddos = DdosProtector::new(
			adapter.clone(),
			config.clone(),
			tracker.clone(),
			blocks.clone(),
			clock.clone(),
			events.clone(),
		);

		Self { adapter, clock, events, config, tracker, blocks, limiter, brute_force, ddos }
	}

	/// Warms the block and whitelist caches. Call once before serving.
	pub async fn init(&self) -> WdResult<()> {
		self.blocks.load().await?;
		info!("Warden initialized");
		Ok(())
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	// Request path //
	//**************//

	/// Decides whether to admit one request.
	///
	/// Order: whitelist bypass, block check, tracking, then global / IP /
	/// user rate limits. The first rejection wins. Blocked clients are
	/// rejected before tracking so a flood of them cannot churn the
	/// activity windows.
	pub async fn check_request(&self, tn_id: TnId, ctx: &RequestContext<'_>) -> RequestVerdict {
		if self.blocks.is_whitelisted(tn_id, ctx.ip) {
			self.tracker.track_request(ctx.ip, ctx.endpoint, ctx.method, ctx.user_agent);
			return RequestVerdict::Allowed { decision: None };
		}

		if let Some(block) = self.blocks.is_blocked(tn_id, ctx.ip) {
			debug!("Rejected blocked IP {} on tenant {}", ctx.ip, tn_id);
			return RequestVerdict::Blocked { block };
		}

		self.tracker.track_request(ctx.ip, ctx.endpoint, ctx.method, ctx.user_agent);

		let global = self
			.limiter
			.check(tn_id, GLOBAL_IDENTIFIER, IdentityKind::Global, CheckOptions::default())
			.await;
		if !global.allowed {
			return RequestVerdict::RateLimited { decision: global };
		}

		let ip_decision = self
			.limiter
			.check(tn_id, &ctx.ip.to_string(), IdentityKind::Ip, CheckOptions::default())
			.await;
		if !ip_decision.allowed {
			return RequestVerdict::RateLimited { decision: ip_decision };
		}

		if let Some(user_id) = ctx.user_id {
			let user =
				self.limiter.check(tn_id, user_id, IdentityKind::User, CheckOptions::default()).await;
			if !user.allowed {
				return RequestVerdict::RateLimited { decision: user };
			}
		}

		RequestVerdict::Allowed { decision: Some(ip_decision) }
	}

	/// Direct token-bucket check for identities the standard request flow
	/// does not cover, endpoint-scoped buckets and per-call overrides
	/// included.
	pub async fn check_rate_limit(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		opts: CheckOptions<'_>,
	) -> RateLimitDecision {
		self.limiter.check(tn_id, identifier, kind, opts).await
	}

	// Login protection //
	//******************//

	pub async fn record_login_attempt(
		&self,
		tn_id: TnId,
		identifier: &str,
		ip: IpAddr,
		success: bool,
		endpoint: Option<&str>,
	) -> WdResult<AttemptOutcome> {
		self.brute_force.track_attempt(tn_id, identifier, ip, success, endpoint).await
	}

	pub fn is_under_attack(&self, tn_id: TnId, identifier: &str, ip: IpAddr) -> bool {
		self.brute_force.is_under_attack(tn_id, identifier, ip)
	}

	pub fn clear_login_attempts(&self, tn_id: TnId, identifier: &str, ip: IpAddr) -> bool {
		self.brute_force.clear_attempts(tn_id, identifier, ip)
	}

	// DDoS //
	//******//

	pub async fn check_ddos(&self, tn_id: TnId) -> WdResult<DdosAssessment> {
		self.ddos.check(tn_id).await
	}

	// Blocking and whitelist //
	//************************//

	pub fn is_blocked(&self, tn_id: TnId, ip: IpAddr) -> Option<BlockedIp> {
		self.blocks.is_blocked(tn_id, ip)
	}

	pub fn is_whitelisted(&self, tn_id: TnId, ip: IpAddr) -> bool {
		self.blocks.is_whitelisted(tn_id, ip)
	}

	/// Manual block by an operator.
	pub async fn block_ip(
		&self,
		tn_id: TnId,
		ip: IpAddr,
		reason: &str,
		duration: Option<u32>,
		blocked_by: &str,
	) -> WdResult<BlockOutcome> {
		self.blocks
			.block_ip(tn_id, ip, reason, BlockType::Manual, duration, blocked_by, false)
			.await
	}

	pub async fn unblock_ip(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		self.blocks.unblock_ip(tn_id, ip).await
	}

	pub async fn add_to_whitelist(
		&self,
		tn_id: TnId,
		ip: IpAddr,
		description: Option<&str>,
		added_by: &str,
		expires_at: Option<Timestamp>,
	) -> WdResult<WhitelistEntry> {
		self.blocks.add_to_whitelist(tn_id, ip, description, added_by, expires_at).await
	}

	pub async fn remove_from_whitelist(&self, tn_id: TnId, ip: IpAddr) -> WdResult<bool> {
		self.blocks.remove_from_whitelist(tn_id, ip).await
	}

	pub async fn list_blocked(&self, tn_id: TnId) -> WdResult<Vec<BlockedIp>> {
		self.blocks.list_blocked(tn_id).await
	}

	pub async fn list_whitelisted(&self, tn_id: TnId) -> WdResult<Vec<WhitelistEntry>> {
		self.blocks.list_whitelisted(tn_id).await
	}

	// Configuration //
	//***************//

	/// Creates the tenant's configuration row with defaults when absent.
	pub async fn ensure_tenant(&self, tn_id: TnId) -> WdResult<GuardConfig> {
		self.config.ensure_config(tn_id).await
	}

	pub async fn config(&self, tn_id: TnId) -> WdResult<GuardConfig> {
		self.config.config(tn_id).await
	}

	pub async fn update_config(
		&self,
		tn_id: TnId,
		update: &UpdateGuardConfig,
	) -> WdResult<GuardConfig> {
		self.config.update_config(tn_id, update).await
	}

	// Introspection //
	//***************//

	pub async fn list_violations(
		&self,
		tn_id: TnId,
		opts: &ListViolationsOptions,
	) -> WdResult<Vec<Violation>> {
		self.adapter.list_violations(tn_id, opts).await
	}

	pub async fn reset_limits(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<u64> {
		self.limiter.reset(tn_id, identifier, kind, endpoint).await
	}

	pub async fn stats(&self, tn_id: TnId) -> WdResult<GuardStats> {
		Ok(GuardStats {
			active_blocks: self.blocks.active_block_count(tn_id),
			whitelist_entries: self.blocks.active_whitelist_count(tn_id),
			tracked_keys: self.tracker.tracked_keys(),
			total_limited: self.limiter.total_limited(),
			buckets: self.limiter.stats(tn_id, None).await?,
		})
	}

	/// Busiest IPs over the trailing window, instance-wide.
	pub fn top_ips(&self, limit: usize, window_secs: u32) -> Vec<IpActivity> {
		self.tracker.top_ips(limit, window_secs)
	}

	pub fn suspicion(&self, ip: IpAddr, endpoint: Option<&str>) -> Suspicion {
		self.tracker.is_suspicious(ip, endpoint)
	}

	// Housekeeping //
	//**************//

	/// One DDoS analysis pass over every configured tenant. Per-tenant
	/// failures are logged and skipped. Returns the tenant count.
	pub async fn run_ddos_pass(&self) -> WdResult<usize> {
		let tenants = self.adapter.list_tenants().await?;
		for &tn_id in &tenants {
			if let Err(err) = self.ddos.check(tn_id).await {
				warn!("DDoS check failed for tenant {}: {}", tn_id, err);
			}
		}
		Ok(tenants.len())
	}

	/// One full housekeeping pass: expired block and whitelist rows,
	/// stale buckets for every configured tenant, aged tracker samples
	/// and dead attempt windows.
	pub async fn run_cleanup(&self) -> WdResult<CleanupSummary> {
		let expired = self.blocks.cleanup().await?;

		let cutoff = Timestamp(self.clock.now().0 - BUCKET_RETENTION_SECS);
		let mut buckets = 0u64;
		for tn_id in self.adapter.list_tenants().await? {
			buckets += self.limiter.cleanup(tn_id, cutoff).await?;
		}

		let (tracker_samples, tracker_keys) = self.tracker.cleanup();
		let attempt_keys = self.brute_force.cleanup();

		let summary =
			CleanupSummary { expired, buckets, tracker_samples, tracker_keys, attempt_keys };
		debug!(
			"Cleanup pass: {} block(s), {} whitelist entr(ies), {} bucket(s), {} sample(s)",
			summary.expired.blocked, summary.expired.whitelist, buckets, tracker_samples
		);
		Ok(summary)
	}
}

impl std::fmt::Debug for Warden {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Warden")
			.field("tracked_keys", &self.tracker.tracked_keys())
			.finish_non_exhaustive()
	}
}


// vim: ts=4
