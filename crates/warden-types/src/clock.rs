//! Clock abstraction for the time-sensitive parts of the subsystem.
//!
//! Token refill, sliding windows, and expiry checks all read the clock
//! through this trait so tests can drive time deterministically instead
//! of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use crate::types::Timestamp;

/// Source of "now" with millisecond resolution.
///
/// `now_ms` is the primitive; the second-resolution `now` derives from it
/// so both views always agree.
pub trait Clock: std::fmt::Debug + Send + Sync {
	/// Milliseconds since the unix epoch.
	fn now_ms(&self) -> i64;

	/// Seconds since the unix epoch.
	fn now(&self) -> Timestamp {
		Timestamp(self.now_ms() / 1000)
	}
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> i64 {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		res.as_millis() as i64
	}
}

/// Manually driven clock for tests and simulations.
///
/// Starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
	ms: AtomicI64,
}

impl ManualClock {
	/// A clock frozen at `start_ms` milliseconds past the epoch.
	pub fn new(start_ms: i64) -> Self {
		Self { ms: AtomicI64::new(start_ms) }
	}

	/// A clock frozen at the current wall-clock time.
	pub fn from_system() -> Self {
		Self::new(SystemClock.now_ms())
	}

	pub fn advance_ms(&self, ms: i64) {
		self.ms.fetch_add(ms, Ordering::Relaxed);
	}

	pub fn advance_secs(&self, secs: i64) {
		self.advance_ms(secs * 1000);
	}

	pub fn set_ms(&self, ms: i64) {
		self.ms.store(ms, Ordering::Relaxed);
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> i64 {
		self.ms.load(Ordering::Relaxed)
	}
}


// vim: ts=4
