//! Brute-Force Detector
//!
//! Sliding-window bookkeeping of authentication attempts per
//! (tenant, login identifier, source IP). Successes stay in the window
//! but only failures count; crossing the configured threshold records a
//! violation and, when auto-blocking is on, blocks the source IP. The
//! windows live in memory only; losing them on restart merely gives an
//! attacker one fresh window, while the blocks themselves persist.

use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use warden_types::guard_adapter::{
	BlockType, GuardAdapter, GuardConfig, IdentityKind, LimitType, Violation,
};

use crate::blocklist::{BlockManager, BlockOutcome};
use crate::config::ConfigManager;
use crate::events::{EventBus, GuardEvent};
use crate::prelude::*;

/// Most attempt keys tracked at once; oldest fall off first.
const MAX_TRACKED_KEYS: usize = 16_384;
/// Attempts kept per key.
const ATTEMPT_CAP: usize = 1000;
/// Entries older than this are dropped by `cleanup`.
const RETENTION_SECS: i64 = 3600;

/// An identifier is "under attack" at 3 failures in 60 seconds from the
/// same source IP, independent of the per-tenant threshold.
const ATTACK_MIN_FAILURES: usize = 3;
const ATTACK_WINDOW_SECS: i64 = 60;

const TRACKED_KEYS_CAP: NonZeroUsize = match NonZeroUsize::new(MAX_TRACKED_KEYS) {
	Some(v) => v,
	None => unreachable!(),
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct AttemptKey {
	tn_id: TnId,
	identifier: Box<str>,
	ip: IpAddr,
}

/// One remembered authentication attempt.
#[derive(Clone, Debug)]
struct Attempt {
	at_ms: i64,
	success: bool,
	endpoint: Option<Box<str>>,
}

/// Outcome of recording one login attempt.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
	/// An IP block was actually written.
	pub blocked: bool,
	/// Failures currently inside the window for this (identifier, IP).
	pub attempts: u32,
	/// The tenant's failure threshold.
	pub threshold: u32,
}

/// Per-identifier failed-login tracking with automatic IP blocking.
pub struct BruteForceDetector {
	adapter: Arc<dyn GuardAdapter>,
	config: Arc<ConfigManager>,
	blocks: Arc<BlockManager>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	attempts: RwLock<LruCache<AttemptKey, VecDeque<Attempt>>>,
}

impl BruteForceDetector {
	pub fn new(
		adapter: Arc<dyn GuardAdapter>,
		config: Arc<ConfigManager>,
		blocks: Arc<BlockManager>,
		clock: Arc<dyn Clock>,
		events: EventBus,
	) -> Self {
		Self {
			adapter,
			config,
			blocks,
			clock,
			events,
			attempts: RwLock::new(LruCache::new(TRACKED_KEYS_CAP)),
		}
	}

	/// Records a login attempt and counts failures left in the window.
	/// The window slides: a success between failures does not absolve
	/// them, so four failures, a success and a fifth failure inside the
	/// window still trip the threshold.
	pub async fn track_attempt(
		&self,
		tn_id: TnId,
		identifier: &str,
		ip: IpAddr,
		success: bool,
		endpoint: Option<&str>,
	) -> WdResult<AttemptOutcome> {
		let config = self.config.config(tn_id).await?;
		let threshold = config.brute_force_attempts;
		if !config.enabled {
			return Ok(AttemptOutcome { blocked: false, attempts: 0, threshold });
		}

		let key = AttemptKey { tn_id, identifier: identifier.into(), ip };
		let now_ms = self.clock.now_ms();
		let window_ms = i64::from(config.brute_force_window) * 1000;

		let failures = {
			let mut cache = self.attempts.write();
			let window = cache.get_or_insert_mut(key, VecDeque::new);
			window.push_back(Attempt {
				at_ms: now_ms,
				success,
				endpoint: endpoint.map(Into::into),
			});
			while window.front().is_some_and(|a| a.at_ms <= now_ms - window_ms) {
				window.pop_front();
			}
			while window.len() > ATTEMPT_CAP {
				window.pop_front();
			}
			window.iter().filter(|a| !a.success).count() as u32
		};

		if failures < threshold {
			return Ok(AttemptOutcome { blocked: false, attempts: failures, threshold });
		}

		warn!(
			"Brute force detected on tenant {}: {} failure(s) for {} from {}",
			tn_id, failures, identifier, ip
		);
		self.record_violation(tn_id, identifier, ip, failures, endpoint, &config).await;
		self.events.emit(GuardEvent::BruteForceDetected {
			tn_id,
			identifier: identifier.into(),
			ip,
			attempts: failures,
		});

		let blocked = if config.auto_block_enabled {
			let reason =
				format!("Brute force: {} failed login attempts for {}", failures, identifier);
			let outcome = self
				.blocks
				.block_ip(
					tn_id,
					ip,
					&reason,
					BlockType::BruteForce,
					Some(config.block_duration),
					"system",
					true,
				)
				.await?;
			!matches!(outcome, BlockOutcome::Whitelisted)
		} else {
			false
		};

		Ok(AttemptOutcome { blocked, attempts: failures, threshold })
	}

	/// True at 3+ failures within the last minute for this exact
	/// (identifier, IP), regardless of the tenant's configuration. Meant
	/// for live indicators, not blocking decisions.
	pub fn is_under_attack(&self, tn_id: TnId, identifier: &str, ip: IpAddr) -> bool {
		let cutoff_ms = self.clock.now_ms() - ATTACK_WINDOW_SECS * 1000;
		let key = AttemptKey { tn_id, identifier: identifier.into(), ip };
		self.attempts.read().peek(&key).is_some_and(|window| {
			window.iter().filter(|a| !a.success && a.at_ms > cutoff_ms).count()
				>= ATTACK_MIN_FAILURES
		})
	}

	/// Forgets every attempt for the key. Returns whether one existed.
	pub fn clear_attempts(&self, tn_id: TnId, identifier: &str, ip: IpAddr) -> bool {
		let key = AttemptKey { tn_id, identifier: identifier.into(), ip };
		self.attempts.write().pop(&key).is_some()
	}

	/// Drops attempts older than an hour and the keys they leave empty.
	/// Returns the number of keys removed.
	pub fn cleanup(&self) -> usize {
		let cutoff_ms = self.clock.now_ms() - RETENTION_SECS * 1000;
		let mut cache = self.attempts.write();

		let mut dead: Vec<AttemptKey> = Vec::new();
		for (key, window) in cache.iter_mut() {
			while window.front().is_some_and(|a| a.at_ms <= cutoff_ms) {
				window.pop_front();
			}
			if window.is_empty() {
				dead.push(key.clone());
			}
		}
		for key in &dead {
			cache.pop(key);
		}
		dead.len()
	}

	async fn record_violation(
		&self,
		tn_id: TnId,
		identifier: &str,
		ip: IpAddr,
		attempts: u32,
		endpoint: Option<&str>,
		config: &GuardConfig,
	) {
		let violation = Violation {
			tn_id,
			identifier: identifier.into(),
			kind: IdentityKind::User,
			ip: Some(ip),
			endpoint: endpoint.map(Into::into),
			method: None,
			limit_type: LimitType::BruteForce,
			current_rate: f64::from(attempts),
			limit_rate: f64::from(config.brute_force_attempts),
			created_at: self.clock.now(),
			action_taken: "auto_blocked".into(),
		};
		if let Err(err) = self.adapter.insert_violation(&violation).await {
			warn!("Failed to record brute force violation for {}: {}", identifier, err);
		}
	}
}

impl std::fmt::Debug for BruteForceDetector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BruteForceDetector")
			.field("tracked_keys", &self.attempts.read().len())
			.finish()
	}
}


// vim: ts=4
