//! Background Sweeper
//!
//! Two periodic loops on the tokio timer: a frequent DDoS analysis pass
//! across all configured tenants, and an infrequent housekeeping pass
//! that deletes expired rows and ages out in-memory telemetry. Both
//! loops log failures and keep running; the tasks are aborted on
//! shutdown or drop.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::prelude::*;
use crate::warden::Warden;

/// Configuration
#[derive(Clone, Copy, Debug)]
pub struct SweeperConfig {
	/// Cadence of the DDoS analysis pass.
	pub ddos_interval: Duration,
	/// Cadence of the housekeeping pass.
	pub cleanup_interval: Duration,
}

impl Default for SweeperConfig {
	fn default() -> Self {
		Self {
			ddos_interval: Duration::from_secs(30),
			cleanup_interval: Duration::from_secs(3600),
		}
	}
}

/// Handle to the background loops.
#[derive(Debug)]
pub struct Sweeper {
	ddos_task: JoinHandle<()>,
	cleanup_task: JoinHandle<()>,
}

impl Sweeper {
	pub fn spawn(warden: Arc<Warden>, config: SweeperConfig) -> Self {
		info!(
			"Starting sweeper: DDoS every {:?}, cleanup every {:?}",
			config.ddos_interval, config.cleanup_interval
		);

		let ddos_task = tokio::spawn({
			let warden = warden.clone();
			async move {
				let mut interval = tokio::time::interval(config.ddos_interval);
				interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
				// the first tick fires immediately; the pass should not
				interval.tick().await;
				loop {
					interval.tick().await;
					if let Err(err) = warden.run_ddos_pass().await {
						warn!("DDoS sweep failed: {}", err);
					}
				}
			}
		});

		let cleanup_task = tokio::spawn(async move {
			let mut interval = tokio::time::interval(config.cleanup_interval);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			interval.tick().await;
			loop {
				interval.tick().await;
				if let Err(err) = warden.run_cleanup().await {
					warn!("Cleanup sweep failed: {}", err);
				}
			}
		});

		Self { ddos_task, cleanup_task }
	}

	pub fn shutdown(&self) {
		self.ddos_task.abort();
		self.cleanup_task.abort();
	}
}

impl Drop for Sweeper {
	fn drop(&mut self) {
		self.shutdown();
	}
}


// vim: ts=4
