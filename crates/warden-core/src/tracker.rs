//! IP Activity Tracker
//!
//! Lightweight, approximate request-rate telemetry per (IP, endpoint),
//! consumed by the brute-force and DDoS detectors. This is deliberately
//! not an accounting ledger: windows are bounded, in-memory only, and
//! lost on restart.

use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::prelude::*;

/// Entries kept per (ip, endpoint) key.
const WINDOW_CAP: usize = 1000;
/// Entries older than this are dropped by `cleanup`.
const RETENTION_SECS: i64 = 3600;
/// Upper bound on tracked (ip, endpoint) keys; least-recently-active
/// keys fall out first when the limit is hit.
const MAX_TRACKED_KEYS: usize = 16_384;

const HIGH_FREQUENCY_WINDOW_SECS: u32 = 10;
const HIGH_FREQUENCY_RPS: f64 = 10.0;
const UNIFORM_MIN_SAMPLES: usize = 10;
const UNIFORM_SAMPLE_CAP: usize = 50;
const UNIFORM_STDDEV_RATIO: f64 = 0.1;
const FAN_OUT_WINDOW_SECS: i64 = 60;
const FAN_OUT_ENDPOINTS: usize = 20;
const SINGLE_AGENT_MIN_REQUESTS: usize = 100;

const TRACKED_KEYS_CAP: NonZeroUsize = match NonZeroUsize::new(MAX_TRACKED_KEYS) {
	Some(v) => v,
	None => unreachable!(),
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct TrackKey {
	ip: IpAddr,
	endpoint: Box<str>,
}

#[derive(Clone, Debug)]
struct Sample {
	at_ms: i64,
	/// Retained with the sample; no heuristic consumes it yet.
	#[allow(dead_code)]
	method: Box<str>,
	user_agent: Option<Box<str>>,
}

/// Request rate over a queried window.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRate {
	pub count: usize,
	/// Requests per second (`count / window`).
	pub rate: f64,
	/// Window length the rate was computed over, in seconds.
	pub window: u32,
}

/// Which anomaly heuristics fired for an IP.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
	HighFrequency,
	UniformTiming,
	EndpointFanOut,
	SingleUserAgent,
}

/// Verdict of `is_suspicious`: suspicious when two or more heuristics fire.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suspicion {
	pub suspicious: bool,
	pub reasons: Vec<SuspicionReason>,
}

/// Aggregated per-IP activity over a queried window.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpActivity {
	pub ip: IpAddr,
	pub requests: usize,
	pub rate: f64,
}

/// In-memory request telemetry, keyed by (ip, endpoint).
///
/// All operations are infallible: they touch only bounded in-memory
/// structures. Lock scopes are short and never held across awaits.
pub struct ActivityTracker {
	clock: Arc<dyn Clock>,
	windows: RwLock<LruCache<TrackKey, VecDeque<Sample>>>,
}

impl ActivityTracker {
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { clock, windows: RwLock::new(LruCache::new(TRACKED_KEYS_CAP)) }
	}

	/// Records one request. Side effect only; never fails.
	pub fn track_request(&self, ip: IpAddr, endpoint: &str, method: &str, user_agent: Option<&str>) {
		let key = TrackKey { ip, endpoint: Box::from(endpoint) };
		let sample = Sample {
			at_ms: self.clock.now_ms(),
			method: Box::from(method),
			user_agent: user_agent.map(Box::from),
		};

		let mut windows = self.windows.write();
		let window = windows.get_or_insert_mut(key, VecDeque::new);
		window.push_back(sample);
		while window.len() > WINDOW_CAP {
			window.pop_front();
		}
	}

	/// Request rate for one (ip, endpoint) over the trailing window.
	/// Read-only: does not promote the key or mutate any window.
	pub fn request_rate(&self, ip: IpAddr, endpoint: &str, window_secs: u32) -> RequestRate {
		let key = TrackKey { ip, endpoint: Box::from(endpoint) };
		let cutoff = self.clock.now_ms() - i64::from(window_secs) * 1000;

		let windows = self.windows.read();
		let count = windows
			.peek(&key)
			.map(|w| w.iter().filter(|s| s.at_ms >= cutoff).count())
			.unwrap_or(0);

		RequestRate { count, rate: count as f64 / f64::from(window_secs.max(1)), window: window_secs }
	}

	/// Evaluates the four anomaly heuristics for an IP; two or more
	/// firing makes the IP suspicious.
	///
	/// The frequency and timing heuristics look at the (ip, endpoint)
	/// window when an endpoint is given and at the merged per-IP sample
	/// set otherwise; fan-out and user-agent are always IP-wide.
	pub fn is_suspicious(&self, ip: IpAddr, endpoint: Option<&str>) -> Suspicion {
		let now_ms = self.clock.now_ms();
		let windows = self.windows.read();

		// Scoped sample timestamps, ascending
		let mut scoped: Vec<i64> = match endpoint {
			Some(endpoint) => {
				let key = TrackKey { ip, endpoint: Box::from(endpoint) };
				windows
					.peek(&key)
					.map(|w| w.iter().map(|s| s.at_ms).collect())
					.unwrap_or_default()
			}
			None => windows
				.iter()
				.filter(|(k, _)| k.ip == ip)
				.flat_map(|(_, w)| w.iter().map(|s| s.at_ms))
				.collect(),
		};
		scoped.sort_unstable();

		let mut reasons = Vec::new();

		// High frequency: rate over a short trailing window
		let freq_cutoff = now_ms - i64::from(HIGH_FREQUENCY_WINDOW_SECS) * 1000;
		let recent = scoped.iter().filter(|&&at| at >= freq_cutoff).count();
		if recent as f64 / f64::from(HIGH_FREQUENCY_WINDOW_SECS) > HIGH_FREQUENCY_RPS {
			reasons.push(SuspicionReason::HighFrequency);
		}

		// Uniform timing: bot-like inter-arrival regularity
		if scoped.len() >= UNIFORM_MIN_SAMPLES {
			let tail = &scoped[scoped.len().saturating_sub(UNIFORM_SAMPLE_CAP)..];
			let intervals: Vec<f64> =
				tail.windows(2).map(|pair| (pair[1] - pair[0]) as f64).collect();
			if !intervals.is_empty() {
				let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
				let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>()
					/ intervals.len() as f64;
				if variance.sqrt() < mean * UNIFORM_STDDEV_RATIO && mean > 0.0 {
					reasons.push(SuspicionReason::UniformTiming);
				}
			}
		}

		// Endpoint fan-out: distinct endpoints touched recently
		let fan_cutoff = now_ms - FAN_OUT_WINDOW_SECS * 1000;
		let fan_out = windows
			.iter()
			.filter(|(k, w)| k.ip == ip && w.iter().any(|s| s.at_ms >= fan_cutoff))
			.count();
		if fan_out > FAN_OUT_ENDPOINTS {
			reasons.push(SuspicionReason::EndpointFanOut);
		}

		// Single user-agent across a large request volume
		let mut total = 0usize;
		let mut agents: HashSet<Option<&str>> = HashSet::new();
		for (key, window) in windows.iter() {
			if key.ip == ip {
				total += window.len();
				for sample in window {
					agents.insert(sample.user_agent.as_deref());
				}
			}
		}
		if total > SINGLE_AGENT_MIN_REQUESTS && agents.len() == 1 {
			reasons.push(SuspicionReason::SingleUserAgent);
		}

		Suspicion { suspicious: reasons.len() >= 2, reasons }
	}

	/// Top IPs by request count across all endpoints within the window.
	pub fn top_ips(&self, limit: usize, window_secs: u32) -> Vec<IpActivity> {
		let cutoff = self.clock.now_ms() - i64::from(window_secs) * 1000;

		let windows = self.windows.read();
		let mut counts: HashMap<IpAddr, usize> = HashMap::new();
		for (key, window) in windows.iter() {
			let recent = window.iter().filter(|s| s.at_ms >= cutoff).count();
			if recent > 0 {
				*counts.entry(key.ip).or_default() += recent;
			}
		}
		drop(windows);

		let mut top: Vec<IpActivity> = counts
			.into_iter()
			.map(|(ip, requests)| IpActivity {
				ip,
				requests,
				rate: requests as f64 / f64::from(window_secs.max(1)),
			})
			.collect();
		top.sort_by(|a, b| b.requests.cmp(&a.requests));
		top.truncate(limit);
		top
	}

	/// Drops entries older than the retention window and removes emptied
	/// keys. Returns (samples dropped, keys removed). The caller owns the
	/// invocation cadence; there is no internal timer.
	pub fn cleanup(&self) -> (usize, usize) {
		let cutoff = self.clock.now_ms() - RETENTION_SECS * 1000;
		let mut dropped = 0usize;

		let mut windows = self.windows.write();
		let mut empty: Vec<TrackKey> = Vec::new();
		for (key, window) in windows.iter_mut() {
			while window.front().is_some_and(|s| s.at_ms < cutoff) {
				window.pop_front();
				dropped += 1;
			}
			if window.is_empty() {
				empty.push(key.clone());
			}
		}
		let removed = empty.len();
		for key in empty {
			windows.pop(&key);
		}

		(dropped, removed)
	}

	/// Number of live (ip, endpoint) keys; used by health reporting.
	pub fn tracked_keys(&self) -> usize {
		self.windows.read().len()
	}
}


// vim: ts=4
