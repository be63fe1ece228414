//! Guard Event Bus
//!
//! Typed notification channel for protection decisions. The bus is handed
//! to the core at construction; nothing here reaches for process-global
//! state. Subscribers (websocket fan-out, alerting, metrics) attach with
//! `subscribe` and receive every event emitted after that point.

use serde::Serialize;
use std::net::IpAddr;
use tokio::sync::broadcast;

use warden_types::guard_adapter::{BlockType, IdentityKind};

use crate::ddos::AttackPattern;
use crate::prelude::*;

/// Something the protection subsystem decided or detected.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEvent {
	IpBlocked {
		tn_id: TnId,
		ip: IpAddr,
		block_type: BlockType,
		reason: Box<str>,
		expires_at: Option<Timestamp>,
	},
	IpUnblocked {
		tn_id: TnId,
		ip: IpAddr,
	},
	RateLimited {
		tn_id: TnId,
		identifier: Box<str>,
		kind: IdentityKind,
		retry_after: u32,
	},
	BruteForceDetected {
		tn_id: TnId,
		identifier: Box<str>,
		ip: IpAddr,
		attempts: u32,
	},
	DdosDetected {
		tn_id: TnId,
		pattern: AttackPattern,
		confidence: f64,
		mitigated: bool,
		blocked_ips: usize,
	},
}

/// Configuration
#[derive(Clone, Debug)]
pub struct EventBusConfig {
	/// Events buffered per subscriber before lagging kicks in.
	pub buffer_size: usize,
}

impl Default for EventBusConfig {
	fn default() -> Self {
		Self { buffer_size: 256 }
	}
}

/// Broadcast channel for guard events.
///
/// Cheap to clone; all clones share one channel. Emitting with no
/// subscribers attached is a no-op, not an error.
#[derive(Clone, Debug)]
pub struct EventBus {
	tx: broadcast::Sender<GuardEvent>,
}

impl EventBus {
	pub fn new() -> Self {
		Self::with_config(EventBusConfig::default())
	}

	pub fn with_config(config: EventBusConfig) -> Self {
		let (tx, _rx) = broadcast::channel(config.buffer_size.max(1));
		Self { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
		self.tx.subscribe()
	}

	pub fn emit(&self, event: GuardEvent) {
		// send only fails when there are no receivers; that is fine
		let _ = self.tx.send(event);
	}

	pub fn subscriber_count(&self) -> usize {
		self.tx.receiver_count()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}


// vim: ts=4
