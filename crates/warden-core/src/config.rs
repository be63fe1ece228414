//! Tenant Configuration Manager
//!
//! Per-tenant protection settings with a short-lived read cache. A tenant
//! without a stored row gets one with built-in defaults on first access,
//! so every tenant that has seen traffic shows up in `list_tenants` and
//! gets swept.

use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;

use warden_types::guard_adapter::{GuardAdapter, GuardConfig, UpdateGuardConfig};

use crate::prelude::*;

/// How long a cached configuration is trusted before re-reading storage.
const CACHE_TTL_MS: i64 = 60_000;

const CONFIG_CACHE_CAP: NonZeroUsize = match NonZeroUsize::new(1024) {
	Some(v) => v,
	None => unreachable!(),
};

#[derive(Clone, Debug)]
struct CachedConfig {
	config: GuardConfig,
	loaded_at_ms: i64,
}

/// Caching front for per-tenant [`GuardConfig`] rows.
pub struct ConfigManager {
	adapter: Arc<dyn GuardAdapter>,
	clock: Arc<dyn Clock>,
	cache: RwLock<LruCache<TnId, CachedConfig>>,
}

impl ConfigManager {
	pub fn new(adapter: Arc<dyn GuardAdapter>, clock: Arc<dyn Clock>) -> Self {
		Self { adapter, clock, cache: RwLock::new(LruCache::new(CONFIG_CACHE_CAP)) }
	}

	/// Returns the effective configuration for a tenant, creating the row
	/// with defaults when none exists yet.
	pub async fn config(&self, tn_id: TnId) -> WdResult<GuardConfig> {
		let now_ms = self.clock.now_ms();

		{
			let cache = self.cache.read();
			if let Some(entry) = cache.peek(&tn_id) {
				if now_ms - entry.loaded_at_ms < CACHE_TTL_MS {
					return Ok(entry.config.clone());
				}
			}
		}

		let config = match self.adapter.read_config(tn_id).await {
			Ok(config) => config,
			Err(Error::NotFound) => {
				debug!("Creating default protection config for tenant {}", tn_id);
				self.adapter.create_config(tn_id, &GuardConfig::default()).await?;
				self.adapter.read_config(tn_id).await?
			}
			Err(err) => return Err(err),
		};

		let mut cache = self.cache.write();
		cache.put(tn_id, CachedConfig { config: config.clone(), loaded_at_ms: now_ms });
		Ok(config)
	}

	/// Creates the configuration row with defaults if the tenant has none.
	/// An existing row is left untouched. Returns the effective config.
	pub async fn ensure_config(&self, tn_id: TnId) -> WdResult<GuardConfig> {
		self.adapter.create_config(tn_id, &GuardConfig::default()).await?;
		let config = self.adapter.read_config(tn_id).await?;
		debug!("Ensured protection config for tenant {}", tn_id);

		let mut cache = self.cache.write();
		cache.put(tn_id, CachedConfig { config: config.clone(), loaded_at_ms: self.clock.now_ms() });
		Ok(config)
	}

	/// Applies a partial update and returns the merged configuration.
	pub async fn update_config(
		&self,
		tn_id: TnId,
		update: &UpdateGuardConfig,
	) -> WdResult<GuardConfig> {
		validate_update(update)?;

		// Make sure a row exists to patch; keeps an existing one untouched.
		self.adapter.create_config(tn_id, &GuardConfig::default()).await?;
		let config = self.adapter.update_config(tn_id, update).await?;
		debug!("Updated protection config for tenant {}", tn_id);

		let mut cache = self.cache.write();
		cache.put(tn_id, CachedConfig { config: config.clone(), loaded_at_ms: self.clock.now_ms() });
		Ok(config)
	}

	/// Drops the cached entry so the next read hits storage.
	pub fn invalidate(&self, tn_id: TnId) {
		self.cache.write().pop(&tn_id);
	}
}

impl std::fmt::Debug for ConfigManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConfigManager").field("cached", &self.cache.read().len()).finish()
	}
}

/// A window of zero would divide by zero in the refill math.
fn validate_update(update: &UpdateGuardConfig) -> WdResult<()> {
	let windows = [
		("globalWindow", update.global_window),
		("ipWindow", update.ip_window),
		("userWindow", update.user_window),
		("ddosWindow", update.ddos_window),
		("bruteForceWindow", update.brute_force_window),
	];
	for (name, value) in windows {
		if value == Some(0) {
			return Err(Error::ValidationError(format!("{} must be at least 1", name)));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryGuardAdapter;
	use warden_types::clock::ManualClock;

	fn setup() -> (ConfigManager, Arc<MemoryGuardAdapter>, Arc<ManualClock>) {
		let adapter = Arc::new(MemoryGuardAdapter::new());
		let clock = Arc::new(ManualClock::new(1_700_000_000_000));
		let manager = ConfigManager::new(adapter.clone(), clock.clone());
		(manager, adapter, clock)
	}

	#[tokio::test]
	async fn test_first_access_creates_the_row() {
		let (manager, adapter, _clock) = setup();
		assert!(matches!(adapter.read_config(TnId(1)).await, Err(Error::NotFound)));

		let config = manager.config(TnId(1)).await.unwrap();
		assert_eq!(config.ip_limit, GuardConfig::default().ip_limit);

		// persisted, so the sweeper's tenant listing will see it
		assert!(adapter.read_config(TnId(1)).await.is_ok());
		assert_eq!(adapter.list_tenants().await.unwrap(), vec![TnId(1)]);
	}

	#[tokio::test]
	async fn test_ensure_config_keeps_existing_row() {
		let (manager, _adapter, _clock) = setup();

		manager.ensure_config(TnId(1)).await.unwrap();
		let update = UpdateGuardConfig { ip_limit: Some(7), ..UpdateGuardConfig::default() };
		manager.update_config(TnId(1), &update).await.unwrap();

		let config = manager.ensure_config(TnId(1)).await.unwrap();
		assert_eq!(config.ip_limit, 7);
	}

	#[tokio::test]
	async fn test_update_writes_through_cache() {
		let (manager, adapter, _clock) = setup();

		let update = UpdateGuardConfig { user_limit: Some(55), ..UpdateGuardConfig::default() };
		let updated = manager.update_config(TnId(2), &update).await.unwrap();
		assert_eq!(updated.user_limit, 55);

		assert_eq!(manager.config(TnId(2)).await.unwrap().user_limit, 55);
		assert_eq!(adapter.read_config(TnId(2)).await.unwrap().user_limit, 55);
	}

	#[tokio::test]
	async fn test_zero_window_is_rejected() {
		let (manager, _adapter, _clock) = setup();

		let update = UpdateGuardConfig { ip_window: Some(0), ..UpdateGuardConfig::default() };
		let result = manager.update_config(TnId(1), &update).await;
		assert!(matches!(result, Err(Error::ValidationError(_))));
	}

	#[tokio::test]
	async fn test_cache_expires_after_ttl() {
		let (manager, adapter, clock) = setup();

		manager.ensure_config(TnId(3)).await.unwrap();
		assert_eq!(manager.config(TnId(3)).await.unwrap().ip_limit, 100);

		// mutate storage behind the manager's back
		let update = UpdateGuardConfig { ip_limit: Some(9), ..UpdateGuardConfig::default() };
		adapter.update_config(TnId(3), &update).await.unwrap();

		// still served from cache
		assert_eq!(manager.config(TnId(3)).await.unwrap().ip_limit, 100);

		clock.advance_ms(CACHE_TTL_MS + 1);
		assert_eq!(manager.config(TnId(3)).await.unwrap().ip_limit, 9);
	}

	#[tokio::test]
	async fn test_invalidate_forces_reread() {
		let (manager, adapter, _clock) = setup();

		manager.ensure_config(TnId(4)).await.unwrap();
		manager.config(TnId(4)).await.unwrap();

		let update = UpdateGuardConfig { burst_allowance: Some(3), ..UpdateGuardConfig::default() };
		adapter.update_config(TnId(4), &update).await.unwrap();

		manager.invalidate(TnId(4));
		assert_eq!(manager.config(TnId(4)).await.unwrap().burst_allowance, 3);
	}
}

// vim: ts=4
