//! DDoS Protector
//!
//! Periodic (or on-demand) analysis of the activity tracker's top
//! talkers. Below the tenant's aggregate request threshold nothing is
//! evaluated. Above it, three attack shapes are scored independently and
//! the most specific detected one wins: a botnet reading outranks a
//! concentrated one, which outranks a distributed one. Mitigation only
//! happens when confidence clears a fixed bar, so a borderline reading
//! never blocks anyone.

use serde::Serialize;
use serde_with::skip_serializing_none;
use std::sync::Arc;

use warden_types::guard_adapter::{
	BlockType, GuardAdapter, GuardConfig, IdentityKind, LimitType, Violation,
};

use crate::blocklist::{BlockManager, BlockOutcome};
use crate::config::ConfigManager;
use crate::events::{EventBus, GuardEvent};
use crate::prelude::*;
use crate::tracker::{ActivityTracker, IpActivity};

/// How many top talkers the analysis considers.
const TOP_IPS: usize = 20;
/// Confidence required before any IP is blocked.
const MITIGATION_CONFIDENCE: f64 = 0.7;

/// Distributed: at least this many IPs each near the per-IP limit.
const DISTRIBUTED_MIN_IPS: usize = 10;
const DISTRIBUTED_RATE_RATIO: f64 = 0.8;
/// Concentrated: fewer than this many IPs each far past the per-IP limit.
const CONCENTRATED_MAX_IPS: usize = 5;
const CONCENTRATED_RATE_MULTIPLIER: f64 = 2.0;
/// Botnet: more than this many top talkers flagged suspicious.
const BOTNET_MIN_IPS: usize = 5;

/// Shape of a detected attack.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackPattern {
	/// Many IPs, each just under or around the per-IP limit.
	Distributed,
	/// A handful of IPs far above the per-IP limit.
	Concentrated,
	/// Many top talkers with bot-like request characteristics.
	Botnet,
}

impl AttackPattern {
	pub fn as_str(&self) -> &'static str {
		match self {
			AttackPattern::Distributed => "distributed",
			AttackPattern::Concentrated => "concentrated",
			AttackPattern::Botnet => "botnet",
		}
	}
}

impl std::fmt::Display for AttackPattern {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of one DDoS analysis pass.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DdosAssessment {
	pub under_attack: bool,
	pub pattern: Option<AttackPattern>,
	pub confidence: f64,
	/// Requests the top talkers produced within the tenant's window.
	pub total_requests: usize,
	pub top_ips: Vec<IpActivity>,
	pub mitigated: bool,
	/// IPs actually blocked by this pass.
	pub blocked_ips: usize,
}

impl DdosAssessment {
	fn quiet(total_requests: usize, top_ips: Vec<IpActivity>) -> Self {
		Self {
			under_attack: false,
			pattern: None,
			confidence: 0.0,
			total_requests,
			top_ips,
			mitigated: false,
			blocked_ips: 0,
		}
	}
}

struct Candidate {
	pattern: AttackPattern,
	confidence: f64,
	offenders: Vec<IpActivity>,
}

/// Traffic-pattern analysis and mitigation over tracker telemetry.
pub struct DdosProtector {
	adapter: Arc<dyn GuardAdapter>,
	config: Arc<ConfigManager>,
	tracker: Arc<ActivityTracker>,
	blocks: Arc<BlockManager>,
	clock: Arc<dyn Clock>,
	events: EventBus,
}

impl DdosProtector {
	pub fn new(
		adapter: Arc<dyn GuardAdapter>,
		config: Arc<ConfigManager>,
		tracker: Arc<ActivityTracker>,
		blocks: Arc<BlockManager>,
		clock: Arc<dyn Clock>,
		events: EventBus,
	) -> Self {
		Self { adapter, config, tracker, blocks, clock, events }
	}

	/// Runs one analysis pass for a tenant and mitigates when warranted.
	pub async fn check(&self, tn_id: TnId) -> WdResult<DdosAssessment> {
		let config = self.config.config(tn_id).await?;
		let window = config.ddos_window;
		let top_ips = self.tracker.top_ips(TOP_IPS, window);
		let total_requests: usize = top_ips.iter().map(|a| a.requests).sum();
		let total_rate: f64 = top_ips.iter().map(|a| a.rate).sum();
		let threshold_rate = f64::from(config.ddos_threshold) / f64::from(window.max(1));

		if !config.enabled || total_rate <= threshold_rate {
			return Ok(DdosAssessment::quiet(total_requests, top_ips));
		}

		let Some(candidate) = self.classify(&config, &top_ips) else {
			return Ok(DdosAssessment::quiet(total_requests, top_ips));
		};

		warn!(
			"DDoS pattern on tenant {}: {} (confidence {:.2}, {} offender(s), {:.1} req/s)",
			tn_id,
			candidate.pattern,
			candidate.confidence,
			candidate.offenders.len(),
			total_rate
		);

		// strictly above the bar; a borderline reading only alerts
		let mitigate = candidate.confidence > MITIGATION_CONFIDENCE && config.auto_block_enabled;
		let blocked_ips = if mitigate {
			self.mitigate(tn_id, &candidate, &config).await
		} else {
			self.record_detection(tn_id, &candidate, total_rate, threshold_rate).await;
			0
		};

		self.events.emit(GuardEvent::DdosDetected {
			tn_id,
			pattern: candidate.pattern,
			confidence: candidate.confidence,
			mitigated: mitigate,
			blocked_ips,
		});

		Ok(DdosAssessment {
			under_attack: true,
			pattern: Some(candidate.pattern),
			confidence: candidate.confidence,
			total_requests,
			top_ips,
			mitigated: mitigate,
			blocked_ips,
		})
	}

	/// Scores all three shapes and picks the most specific detected one.
	fn classify(&self, config: &GuardConfig, top_ips: &[IpActivity]) -> Option<Candidate> {
		// requests/second a single IP is nominally allowed
		let per_ip_rate = f64::from(config.ip_limit) / f64::from(config.ip_window.max(1));

		let near_limit: Vec<IpActivity> = top_ips
			.iter()
			.filter(|a| a.rate > per_ip_rate * DISTRIBUTED_RATE_RATIO)
			.cloned()
			.collect();
		let hot: Vec<IpActivity> = top_ips
			.iter()
			.filter(|a| a.rate > per_ip_rate * CONCENTRATED_RATE_MULTIPLIER)
			.cloned()
			.collect();
		let suspicious: Vec<IpActivity> = top_ips
			.iter()
			.filter(|a| self.tracker.is_suspicious(a.ip, None).suspicious)
			.cloned()
			.collect();

		if suspicious.len() > BOTNET_MIN_IPS {
			return Some(Candidate {
				pattern: AttackPattern::Botnet,
				confidence: (suspicious.len() as f64 / 10.0).min(1.0),
				offenders: suspicious,
			});
		}
		if !hot.is_empty() && hot.len() < CONCENTRATED_MAX_IPS {
			let top_rate = hot.iter().map(|a| a.rate).fold(0.0, f64::max);
			return Some(Candidate {
				pattern: AttackPattern::Concentrated,
				confidence: (top_rate / 100.0).min(1.0),
				offenders: hot,
			});
		}
		if near_limit.len() >= DISTRIBUTED_MIN_IPS {
			return Some(Candidate {
				pattern: AttackPattern::Distributed,
				confidence: (near_limit.len() as f64 / 20.0).min(1.0),
				offenders: near_limit,
			});
		}
		None
	}

	/// Blocks the offenders in parallel and writes one violation per IP
	/// actually blocked; whitelisted IPs and failed writes are skipped.
	async fn mitigate(&self, tn_id: TnId, candidate: &Candidate, config: &GuardConfig) -> usize {
		let reason = format!("DDoS mitigation: {} attack", candidate.pattern);
		let per_ip_rate = f64::from(config.ip_limit) / f64::from(config.ip_window.max(1));
		let results = futures::future::join_all(candidate.offenders.iter().map(|offender| {
			self.blocks.block_ip(
				tn_id,
				offender.ip,
				&reason,
				BlockType::Ddos,
				Some(config.block_duration),
				"system",
				true,
			)
		}))
		.await;

		let mut blocked = 0usize;
		for (offender, result) in candidate.offenders.iter().zip(results) {
			match result {
				Ok(BlockOutcome::Whitelisted) => {}
				Ok(_) => {
					blocked += 1;
					let violation = Violation {
						tn_id,
						identifier: offender.ip.to_string().into(),
						kind: IdentityKind::Ip,
						ip: Some(offender.ip),
						endpoint: None,
						method: None,
						limit_type: LimitType::Ddos,
						current_rate: offender.rate,
						limit_rate: per_ip_rate,
						created_at: self.clock.now(),
						action_taken: "auto_blocked".into(),
					};
					if let Err(err) = self.adapter.insert_violation(&violation).await {
						warn!("Failed to record DDoS violation for {}: {}", offender.ip, err);
					}
				}
				Err(err) => warn!("Failed to block {} during mitigation: {}", offender.ip, err),
			}
		}
		info!(
			"Mitigated {} attack on tenant {}: blocked {} of {} offender(s)",
			candidate.pattern,
			tn_id,
			blocked,
			candidate.offenders.len()
		);
		blocked
	}

	/// Audit record for an attack that was seen but not acted on.
	async fn record_detection(
		&self,
		tn_id: TnId,
		candidate: &Candidate,
		total_rate: f64,
		threshold_rate: f64,
	) {
		let violation = Violation {
			tn_id,
			identifier: candidate.pattern.as_str().into(),
			kind: IdentityKind::Global,
			ip: None,
			endpoint: None,
			method: None,
			limit_type: LimitType::Ddos,
			current_rate: total_rate,
			limit_rate: threshold_rate,
			created_at: self.clock.now(),
			action_taken: "detected".into(),
		};
		if let Err(err) = self.adapter.insert_violation(&violation).await {
			warn!("Failed to record DDoS violation for tenant {}: {}", tn_id, err);
		}
	}
}

impl std::fmt::Debug for DdosProtector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DdosProtector").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryGuardAdapter;
	use std::net::IpAddr;
	use warden_types::clock::ManualClock;
	use warden_types::guard_adapter::ListViolationsOptions;

	const T1: TnId = TnId(1);

	struct Setup {
		protector: DdosProtector,
		tracker: Arc<ActivityTracker>,
		blocks: Arc<BlockManager>,
		adapter: Arc<MemoryGuardAdapter>,
	}

	/// ip_limit 60/60s makes the nominal per-IP rate an even 1 req/s.
	fn attack_config() -> GuardConfig {
		GuardConfig {
			ddos_threshold: 100,
			ddos_window: 60,
			ip_limit: 60,
			ip_window: 60,
			..GuardConfig::default()
		}
	}

	async fn setup(config: GuardConfig) -> Setup {
		let adapter = Arc::new(MemoryGuardAdapter::new());
		adapter.create_config(T1, &config).await.unwrap();
		let clock = Arc::new(ManualClock::new(1_700_000_000_000));
		let events = EventBus::new();
		let tracker = Arc::new(ActivityTracker::new(clock.clone()));
		let blocks = Arc::new(BlockManager::new(adapter.clone(), clock.clone(), events.clone()));
		let protector = DdosProtector::new(
			adapter.clone(),
			Arc::new(ConfigManager::new(adapter.clone(), clock.clone())),
			tracker.clone(),
			blocks.clone(),
			clock,
			events,
		);
		Setup { protector, tracker, blocks, adapter }
	}

	fn ip(n: u8) -> IpAddr {
		IpAddr::from([198, 51, 100, n])
	}

	/// `count` requests from one IP, two alternating user agents so the
	/// single-agent heuristic stays quiet.
	fn send(tracker: &ActivityTracker, addr: IpAddr, endpoint: &str, count: usize) {
		for n in 0..count {
			let agent = if n % 2 == 0 { "agent-a" } else { "agent-b" };
			tracker.track_request(addr, endpoint, "GET", Some(agent));
		}
	}

	#[tokio::test]
	async fn test_below_threshold_is_quiet() {
		let s = setup(attack_config()).await;
		send(&s.tracker, ip(1), "/", 50);

		// 0.83 req/s from the top talkers, threshold rate is 1.67
		let assessment = s.protector.check(T1).await.unwrap();
		assert!(!assessment.under_attack);
		assert_eq!(assessment.total_requests, 50);
		assert!(!assessment.top_ips.is_empty());
	}

	#[tokio::test]
	async fn test_distributed_attack_below_confidence_is_not_mitigated() {
		let s = setup(attack_config()).await;
		// 12 IPs at ~0.83 req/s, above 80% of the 1 req/s per-IP rate
		for n in 0..12 {
			send(&s.tracker, ip(n), "/", 50);
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.under_attack);
		assert_eq!(assessment.pattern, Some(AttackPattern::Distributed));
		assert!((assessment.confidence - 0.6).abs() < 1e-9);
		assert!(!assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 0);
		assert!(s.blocks.is_blocked(T1, ip(0)).is_none());

		let violations =
			s.adapter.list_violations(T1, &ListViolationsOptions::default()).await.unwrap();
		assert_eq!(violations.len(), 1);
		assert_eq!(&*violations[0].action_taken, "detected");
		assert_eq!(&*violations[0].identifier, "distributed");
	}

	#[tokio::test]
	async fn test_confidence_exactly_at_gate_is_not_mitigated() {
		let s = setup(attack_config()).await;
		// 14 near-limit IPs put the distributed confidence at exactly 0.7
		for n in 0..14 {
			send(&s.tracker, ip(n), "/", 50);
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.under_attack);
		assert!((assessment.confidence - 0.7).abs() < 1e-9);
		assert!(!assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 0);
	}

	#[tokio::test]
	async fn test_distributed_attack_is_mitigated() {
		let s = setup(attack_config()).await;
		for n in 0..15 {
			send(&s.tracker, ip(n), "/", 50);
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.under_attack);
		assert_eq!(assessment.pattern, Some(AttackPattern::Distributed));
		assert!((assessment.confidence - 0.75).abs() < 1e-9);
		assert!(assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 15);

		let block = s.blocks.is_blocked(T1, ip(3)).unwrap();
		assert_eq!(block.block_type, BlockType::Ddos);

		// one violation per blocked IP
		let violations =
			s.adapter.list_violations(T1, &ListViolationsOptions::default()).await.unwrap();
		assert_eq!(violations.len(), 15);
		assert!(violations.iter().all(|v| {
			v.limit_type == LimitType::Ddos
				&& v.kind == IdentityKind::Ip
				&& v.ip.is_some()
				&& &*v.action_taken == "auto_blocked"
		}));
	}

	#[tokio::test]
	async fn test_concentrated_attack() {
		let s = setup(attack_config()).await;
		// two IPs at 75 req/s, spread over endpoints to stay under the
		// per-endpoint sample cap
		for n in 0..2 {
			for e in 0..5 {
				send(&s.tracker, ip(n), &format!("/api/{}", e), 900);
			}
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.under_attack);
		assert_eq!(assessment.pattern, Some(AttackPattern::Concentrated));
		assert!((assessment.confidence - 0.75).abs() < 1e-9);
		assert!(assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 2);

		let violations =
			s.adapter.list_violations(T1, &ListViolationsOptions::default()).await.unwrap();
		assert_eq!(violations.len(), 2);
	}

	#[tokio::test]
	async fn test_botnet_takes_precedence() {
		let s = setup(attack_config()).await;
		// 10 IPs, each fast (15 req/s over the 10s window) with a single
		// user agent: two heuristics fire, so every one is suspicious.
		// Their rate also qualifies as distributed; botnet must win.
		for n in 0..10 {
			for _ in 0..150 {
				s.tracker.track_request(ip(n), "/", "GET", Some("botware/1.0"));
			}
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.under_attack);
		assert_eq!(assessment.pattern, Some(AttackPattern::Botnet));
		assert!((assessment.confidence - 1.0).abs() < 1e-9);
		assert!(assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 10);
	}

	#[tokio::test]
	async fn test_auto_block_disabled_never_mitigates() {
		let config = GuardConfig { auto_block_enabled: false, ..attack_config() };
		let s = setup(config).await;
		for n in 0..15 {
			send(&s.tracker, ip(n), "/", 50);
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.under_attack);
		assert!(!assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 0);
	}

	#[tokio::test]
	async fn test_whitelisted_ip_survives_mitigation() {
		let s = setup(attack_config()).await;
		s.blocks.add_to_whitelist(T1, ip(0), Some("load tester"), "admin", None).await.unwrap();
		for n in 0..15 {
			send(&s.tracker, ip(n), "/", 50);
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(assessment.mitigated);
		assert_eq!(assessment.blocked_ips, 14);
		assert!(s.blocks.is_blocked(T1, ip(0)).is_none());
		assert!(s.blocks.is_blocked(T1, ip(1)).is_some());
	}

	#[tokio::test]
	async fn test_disabled_tenant_is_never_checked() {
		let config = GuardConfig { enabled: false, ..attack_config() };
		let s = setup(config).await;
		for n in 0..15 {
			send(&s.tracker, ip(n), "/", 50);
		}

		let assessment = s.protector.check(T1).await.unwrap();
		assert!(!assessment.under_attack);
		assert!(!assessment.mitigated);
	}
}

// vim: ts=4
