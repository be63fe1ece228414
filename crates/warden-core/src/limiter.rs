//! Rate Limiter
//!
//! Token-bucket rate limiting with storage-backed buckets, so counters
//! survive restarts and are shared between nodes pointing at the same
//! database. Refill is lazy: tokens are credited on access from the time
//! elapsed since the last credited refill, floor-truncated, and the refill
//! marker only advances when at least one whole token was added. Partial
//! progress toward the next token is therefore never lost.
//!
//! The limiter fails open: when storage misbehaves the request is admitted
//! and the failure is logged, on the grounds that an outage should degrade
//! protection, not availability.

use serde::Serialize;
use serde_with::skip_serializing_none;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use warden_types::guard_adapter::{
	BucketStats, GuardAdapter, GuardConfig, IdentityKind, LimitType, RateBucket, Violation,
};

use crate::config::ConfigManager;
use crate::events::{EventBus, GuardEvent};
use crate::prelude::*;

/// Outcome of a rate-limit check.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
	pub allowed: bool,
	/// Effective limit, burst allowance included.
	pub limit: u32,
	/// Tokens left after this decision.
	pub remaining: i64,
	/// When the bucket is fully replenished, seconds precision.
	pub reset_at: Timestamp,
	/// Seconds until retrying makes sense, denials only. Never zero.
	pub retry_after: Option<u32>,
}

/// Per-call adjustments to a limit check. An explicit limit replaces the
/// configured one outright, burst allowance included.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckOptions<'a> {
	pub endpoint: Option<&'a str>,
	pub limit: Option<u32>,
	/// Window in seconds.
	pub window: Option<u32>,
}

/// Storage-backed token-bucket limiter, one bucket per
/// (tenant, identifier, kind, endpoint).
pub struct RateLimiter {
	adapter: Arc<dyn GuardAdapter>,
	config: Arc<ConfigManager>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	total_limited: AtomicU64,
}

impl RateLimiter {
	pub fn new(
		adapter: Arc<dyn GuardAdapter>,
		config: Arc<ConfigManager>,
		clock: Arc<dyn Clock>,
		events: EventBus,
	) -> Self {
		Self { adapter, config, clock, events, total_limited: AtomicU64::new(0) }
	}

	/// Checks and consumes one token for the identity.
	///
	/// Infallible by contract: storage errors admit the request.
	pub async fn check(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		opts: CheckOptions<'_>,
	) -> RateLimitDecision {
		match self.check_inner(tn_id, identifier, kind, opts).await {
			Ok(decision) => decision,
			Err(err) => {
				warn!("Rate limit check failed for {} ({}), failing open: {}", identifier, kind, err);
				self.allow_all(&GuardConfig::default(), kind, opts)
			}
		}
	}

	async fn check_inner(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		opts: CheckOptions<'_>,
	) -> WdResult<RateLimitDecision> {
		let config = self.config.config(tn_id).await?;
		if !config.enabled {
			return Ok(self.allow_all(&config, kind, opts));
		}

		let (effective_limit, window) = resolve_limits(&config, kind, opts);
		let window_ms = (i64::from(window) * 1000).max(1);
		let now_ms = self.clock.now_ms();
		let now = self.clock.now();

		let mut bucket =
			match self.adapter.read_bucket(tn_id, identifier, kind, opts.endpoint).await {
				Ok(bucket) => bucket,
				Err(Error::NotFound) => RateBucket {
					tn_id,
					identifier: identifier.into(),
					kind,
					endpoint: opts.endpoint.map(Into::into),
					tokens_remaining: i64::from(effective_limit),
					last_refill: now_ms,
					requests_count: 0,
					window_start: now,
				},
				Err(err) => return Err(err),
			};

		// Lazy refill. The marker only advances when a whole token was
		// credited, so sub-token elapsed time keeps accumulating.
		let elapsed_ms = (now_ms - bucket.last_refill).max(0);
		let tokens_to_add = elapsed_ms * i64::from(effective_limit) / window_ms;
		if tokens_to_add > 0 {
			bucket.tokens_remaining =
				(bucket.tokens_remaining + tokens_to_add).min(i64::from(effective_limit));
			bucket.last_refill = now_ms;
		}
		let reset_at = Timestamp((bucket.last_refill + window_ms) / 1000);

		if bucket.tokens_remaining > 0 {
			bucket.tokens_remaining -= 1;
			if now >= Timestamp(bucket.window_start.0 + i64::from(window)) {
				bucket.window_start = now;
				bucket.requests_count = 1;
			} else {
				bucket.requests_count += 1;
			}
			self.adapter.put_bucket(&bucket).await?;

			return Ok(RateLimitDecision {
				allowed: true,
				limit: effective_limit,
				remaining: bucket.tokens_remaining,
				reset_at,
				retry_after: None,
			});
		}

		// Denied. No state changed (a refill would have admitted), so the
		// bucket is not written back.
		let remaining_ms = (bucket.last_refill + window_ms - now_ms).max(0);
		let retry_after = u32::try_from((remaining_ms + 999) / 1000).unwrap_or(u32::MAX).max(1);

		self.total_limited.fetch_add(1, Ordering::Relaxed);
		debug!(
			"Rate limited {} ({}) on tenant {}: retry after {}s",
			identifier, kind, tn_id, retry_after
		);

		self.record_violation(tn_id, identifier, kind, opts.endpoint, &bucket, effective_limit)
			.await;
		self.events.emit(GuardEvent::RateLimited {
			tn_id,
			identifier: identifier.into(),
			kind,
			retry_after,
		});

		Ok(RateLimitDecision {
			allowed: false,
			limit: effective_limit,
			remaining: 0,
			reset_at,
			retry_after: Some(retry_after),
		})
	}

	/// Best-effort audit record; a failed write must not turn a clean
	/// throttle into an error.
	async fn record_violation(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
		bucket: &RateBucket,
		effective_limit: u32,
	) {
		let violation = Violation {
			tn_id,
			identifier: identifier.into(),
			kind,
			ip: if kind == IdentityKind::Ip { identifier.parse().ok() } else { None },
			endpoint: endpoint.map(Into::into),
			method: None,
			limit_type: LimitType::Rate,
			current_rate: bucket.requests_count as f64,
			limit_rate: f64::from(effective_limit),
			created_at: self.clock.now(),
			action_taken: "throttled".into(),
		};
		if let Err(err) = self.adapter.insert_violation(&violation).await {
			warn!("Failed to record rate violation for {}: {}", identifier, err);
		}
	}

	fn allow_all(
		&self,
		config: &GuardConfig,
		kind: IdentityKind,
		opts: CheckOptions<'_>,
	) -> RateLimitDecision {
		let (effective_limit, window) = resolve_limits(config, kind, opts);
		RateLimitDecision {
			allowed: true,
			limit: effective_limit,
			remaining: i64::from(effective_limit),
			reset_at: Timestamp(self.clock.now().0 + i64::from(window)),
			retry_after: None,
		}
	}

	/// Deletes stored buckets for an identity; all endpoints when
	/// `endpoint` is `None`. Returns the number of buckets removed.
	pub async fn reset(
		&self,
		tn_id: TnId,
		identifier: &str,
		kind: IdentityKind,
		endpoint: Option<&str>,
	) -> WdResult<u64> {
		let removed = self.adapter.delete_buckets(tn_id, identifier, kind, endpoint).await?;
		debug!("Reset {} bucket(s) for {} ({}) on tenant {}", removed, identifier, kind, tn_id);
		Ok(removed)
	}

	/// Aggregate bucket statistics, optionally narrowed to one kind.
	pub async fn stats(
		&self,
		tn_id: TnId,
		kind: Option<IdentityKind>,
	) -> WdResult<Vec<BucketStats>> {
		self.adapter.bucket_stats(tn_id, kind).await
	}

	/// Drops buckets idle since the cutoff. Losing a bucket is harmless;
	/// the identity just starts over with a full one.
	pub async fn cleanup(&self, tn_id: TnId, older_than: Timestamp) -> WdResult<u64> {
		self.adapter.cleanup_buckets(tn_id, older_than).await
	}

	/// Requests denied by this process since start.
	pub fn total_limited(&self) -> u64 {
		self.total_limited.load(Ordering::Relaxed)
	}
}

impl std::fmt::Debug for RateLimiter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RateLimiter")
			.field("total_limited", &self.total_limited())
			.finish()
	}
}

/// Effective `(limit, window)` for a check: a per-call override wins, else
/// the per-kind config plus burst. The tenant-wide bucket gets no burst.
fn resolve_limits(config: &GuardConfig, kind: IdentityKind, opts: CheckOptions<'_>) -> (u32, u32) {
	let (limit, window, burst) = match kind {
		IdentityKind::Ip => (config.ip_limit, config.ip_window, config.burst_allowance),
		IdentityKind::User => (config.user_limit, config.user_window, config.burst_allowance),
		IdentityKind::Global => (config.global_limit, config.global_window, 0),
	};
	(opts.limit.unwrap_or_else(|| limit.saturating_add(burst)), opts.window.unwrap_or(window))
}


// vim: ts=4
