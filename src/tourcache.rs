//! Public API for the tourcache system
//!
//! A `TourCache` pairs the tiered definition cache with the instance
//! lifecycle manager behind one caller-owned handle. There are no global
//! singletons: construct as many independent caches as needed and pass the
//! handle through dependency injection. Handles are Arc-backed and cheap to
//! clone; the background maintenance timer and the durable write service are
//! shut down when the last handle is dropped or `destroy()` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::config::{CacheConfig, EvictionPolicyType, LifecycleConfig, default_storage_path};
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::durable::{DurableStore, FileStore, MemoryStore};
use crate::cache::entry::Priority;
use crate::cache::optimizer::Optimizer;
use crate::cache::worker::{MaintenanceScheduler, run_maintenance_tick};
use crate::lifecycle::{MemoryStats, PressureCleanup, TourLifecycleManager};
use crate::telemetry::CacheStatsSnapshot;

/// How long shutdown waits for pending durable writes
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

struct CacheInner<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    coordinator: Arc<CacheCoordinator<V>>,
    lifecycle: Arc<TourLifecycleManager>,
    scheduler: Mutex<Option<MaintenanceScheduler>>,
    /// Optimizer state for manually-stepped maintenance
    optimizer: Mutex<Optimizer>,
    destroyed: AtomicBool,
}

impl<V> CacheInner<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut scheduler) = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            scheduler.stop();
        }
        self.lifecycle.release_all();
        self.coordinator.shutdown(SHUTDOWN_FLUSH_TIMEOUT);
    }
}

impl<V> Drop for CacheInner<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Tiered definition cache with instance lifecycle management
pub struct TourCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for TourCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> TourCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a new cache builder with fluent configuration
    pub fn builder() -> TourCacheBuilder<V> {
        TourCacheBuilder::new()
    }

    /// Create a new cache with default configuration
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Look up a definition through the full fallback chain
    ///
    /// Hot tier, then persistent tier, then durable store. `None` means the
    /// caller must fetch from the authoritative object source and push the
    /// result back with [`set`](Self::set).
    pub fn get(&self, id: &str) -> Option<V> {
        self.inner.coordinator.get(id)
    }

    /// Look up a definition in the hot tier only
    pub fn get_if_cached(&self, id: &str) -> Option<V> {
        self.inner.coordinator.get_hot(id)
    }

    /// Look up a definition, fetching from the supplied source on a full miss
    ///
    /// The fetcher is invoked only after the whole fallback chain misses; its
    /// result is cached before being returned. Fetch errors pass through
    /// untouched, and retries stay the fetcher's responsibility.
    pub fn get_or_fetch<F, E>(&self, id: &str, priority: Priority, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(id) {
            return Ok(value);
        }
        let value = fetch()?;
        self.set(id, value.clone(), priority);
        Ok(value)
    }

    /// Store a definition
    pub fn set(&self, id: &str, value: V, priority: Priority) {
        self.inner.coordinator.set(id, value, priority);
    }

    /// Whether the id is resident in an in-process tier
    pub fn contains(&self, id: &str) -> bool {
        self.inner.coordinator.contains(id)
    }

    /// Remove the given ids from every tier; unknown ids are a no-op
    pub fn invalidate(&self, ids: &[&str]) {
        self.inner.coordinator.invalidate(ids);
    }

    /// Remove every entry whose id contains the pattern
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.inner.coordinator.invalidate_pattern(pattern)
    }

    /// Remove every entry from every tier
    pub fn invalidate_all(&self) {
        self.inner.coordinator.invalidate_all();
    }

    /// Point-in-time cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.coordinator.stats().snapshot()
    }

    /// Cache statistics as a JSON string
    pub fn stats_json(&self) -> String {
        serde_json::to_string(&self.stats()).unwrap_or_default()
    }

    /// Register a runtime instance, estimating its size from the payload
    pub fn register_instance<P: Serialize>(
        &self,
        id: impl Into<String>,
        payload: &P,
        release: impl FnOnce() + Send + 'static,
    ) {
        self.inner.lifecycle.register_instance(id, payload, release);
    }

    /// Register a runtime instance with a caller-supplied size
    pub fn register_instance_sized(
        &self,
        id: impl Into<String>,
        size_bytes: u64,
        release: impl FnOnce() + Send + 'static,
    ) {
        self.inner
            .lifecycle
            .register_instance_sized(id, size_bytes, release);
    }

    /// Record an access to a live instance
    pub fn access_instance(&self, id: &str) -> bool {
        self.inner.lifecycle.access_instance(id)
    }

    /// Flip an instance's active flag
    pub fn set_instance_active(&self, id: &str, active: bool) -> bool {
        self.inner.lifecycle.set_active(id, active)
    }

    /// Unregister and release an instance; idempotent
    pub fn unregister_instance(&self, id: &str) -> bool {
        self.inner.lifecycle.unregister_instance(id)
    }

    /// Remove inactive instances idle past the configured threshold
    pub fn cleanup_inactive_tours(&self) -> usize {
        self.inner.lifecycle.cleanup_inactive_tours()
    }

    /// Force a pressure cleanup pass
    pub fn cleanup_by_memory_pressure(&self) -> PressureCleanup {
        self.inner.lifecycle.cleanup_by_memory_pressure()
    }

    /// Aggregate memory statistics for registered instances
    pub fn memory_stats(&self) -> MemoryStats {
        self.inner.lifecycle.memory_stats()
    }

    /// Run one maintenance pass synchronously
    ///
    /// Equivalent to a single background timer tick; lets tests step
    /// maintenance deterministically.
    pub fn run_maintenance_once(&self) {
        let mut optimizer = self
            .inner
            .optimizer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        run_maintenance_tick(&self.inner.coordinator, &self.inner.lifecycle, &mut optimizer);
    }

    /// Cancel the background maintenance timer
    pub fn stop_maintenance(&self) {
        if let Some(mut scheduler) = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            scheduler.stop();
        }
    }

    /// Tear the cache down: cancel timers, flush pending durable writes with a
    /// bounded timeout, and release every remaining instance
    ///
    /// Idempotent, and implied by dropping the last handle.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl<V> Default for TourCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for TourCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourCache").finish_non_exhaustive()
    }
}

/// Fluent builder for [`TourCache`] configuration
pub struct TourCacheBuilder<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    cache_config: CacheConfig,
    lifecycle_config: LifecycleConfig,
    durable_store: Option<Arc<dyn DurableStore>>,
    background_maintenance: bool,
    _phantom: std::marker::PhantomData<V>,
}

impl<V> TourCacheBuilder<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            lifecycle_config: LifecycleConfig::default(),
            durable_store: None,
            background_maintenance: true,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Set the cache id used for log context and default storage paths
    pub fn cache_id(mut self, id: impl Into<String>) -> Self {
        self.cache_config.cache_id = id.into();
        self
    }

    /// Set the hot tier byte budget
    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.cache_config.max_size_bytes = bytes;
        self
    }

    /// Set the hot tier entry bound
    pub fn max_entries(mut self, entries: usize) -> Self {
        self.cache_config.max_entries = entries;
        self
    }

    /// Set the entry time-to-live in milliseconds
    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_config.ttl_ms = ttl_ms;
        self
    }

    /// Set the eviction policy
    pub fn eviction_policy(mut self, policy: EvictionPolicyType) -> Self {
        self.cache_config.eviction_policy = policy;
        self
    }

    /// Write high-priority entries through to the durable store
    pub fn persist_to_durable_store(mut self, persist: bool) -> Self {
        self.cache_config.persist_to_durable_store = persist;
        self
    }

    /// Supply a durable store backend
    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable_store = Some(store);
        self
    }

    /// Set the live instance count bound
    pub fn max_instances(mut self, instances: usize) -> Self {
        self.lifecycle_config.max_instances = instances;
        self
    }

    /// Set the live instance memory budget in bytes
    pub fn max_memory_usage(mut self, bytes: u64) -> Self {
        self.lifecycle_config.max_memory_usage = bytes;
        self
    }

    /// Set the background maintenance interval in milliseconds
    pub fn cleanup_interval_ms(mut self, interval_ms: u64) -> Self {
        self.lifecycle_config.cleanup_interval_ms = interval_ms;
        self
    }

    /// Set the idle threshold for inactive instance cleanup in milliseconds
    pub fn inactive_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.lifecycle_config.inactive_threshold_ms = threshold_ms;
        self
    }

    /// Set the memory pressure threshold in bytes
    pub fn memory_pressure_threshold_bytes(mut self, bytes: u64) -> Self {
        self.lifecycle_config.memory_pressure_threshold_bytes = Some(bytes);
        self
    }

    /// Enable or disable the background maintenance timer
    pub fn background_maintenance(mut self, enabled: bool) -> Self {
        self.background_maintenance = enabled;
        self
    }

    /// Build the cache with the configured settings
    ///
    /// Construction never fails: invalid values are clamped with a logged
    /// warning, and a durable backend that cannot be opened falls back to the
    /// in-memory store.
    pub fn build(self) -> TourCache<V> {
        let cache_config = self.cache_config.validated();
        let lifecycle_config = self.lifecycle_config.validated();

        let store: Arc<dyn DurableStore> = match self.durable_store {
            Some(store) => store,
            None if cache_config.persist_to_durable_store => {
                let dir = default_storage_path(&cache_config.cache_id);
                match FileStore::open(&dir) {
                    Ok(store) => Arc::new(store),
                    Err(err) => {
                        log::warn!(
                            "failed to open file store at {:?} ({}), using in-memory store",
                            dir,
                            err
                        );
                        Arc::new(MemoryStore::new())
                    }
                }
            }
            None => Arc::new(MemoryStore::new()),
        };

        let interval = lifecycle_config.cleanup_interval();
        let coordinator = Arc::new(CacheCoordinator::new(cache_config, store));
        let lifecycle = Arc::new(TourLifecycleManager::new(lifecycle_config));

        let scheduler = if self.background_maintenance {
            Some(MaintenanceScheduler::start(
                coordinator.clone(),
                lifecycle.clone(),
                interval,
            ))
        } else {
            None
        };

        TourCache {
            inner: Arc::new(CacheInner {
                coordinator,
                lifecycle,
                scheduler: Mutex::new(scheduler),
                optimizer: Mutex::new(Optimizer::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

impl<V> Default for TourCacheBuilder<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TourDefinition {
        name: String,
        steps: Vec<String>,
    }

    fn definition(name: &str) -> TourDefinition {
        TourDefinition {
            name: name.to_string(),
            steps: vec!["welcome".to_string(), "dashboard".to_string()],
        }
    }

    fn quiet_cache() -> TourCache<TourDefinition> {
        TourCache::builder()
            .cache_id("test")
            .background_maintenance(false)
            .build()
    }

    #[test]
    fn test_round_trip_through_public_api() {
        let cache = quiet_cache();
        cache.set("welcome", definition("welcome"), Priority::Medium);
        assert_eq!(cache.get("welcome"), Some(definition("welcome")));
        cache.destroy();
    }

    #[test]
    fn test_lru_scenario_retains_newest_three() {
        let cache: TourCache<TourDefinition> = TourCache::builder()
            .max_entries(3)
            .eviction_policy(EvictionPolicyType::Lru)
            .background_maintenance(false)
            .build();

        for id in ["a", "b", "c", "d"] {
            cache.set(id, definition(id), Priority::Medium);
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(cache.get_if_cached("a"), None);
        for id in ["b", "c", "d"] {
            assert!(cache.get_if_cached(id).is_some(), "expected '{}' cached", id);
        }
        cache.destroy();
    }

    #[test]
    fn test_get_or_fetch_only_fetches_on_full_miss() {
        let cache = quiet_cache();
        cache.set("cached", definition("cached"), Priority::Medium);

        let fetched: Result<_, String> =
            cache.get_or_fetch("cached", Priority::Medium, || panic!("must not fetch"));
        assert!(fetched.is_ok());

        let fetched: Result<_, String> =
            cache.get_or_fetch("fresh", Priority::High, || Ok(definition("fresh")));
        assert_eq!(fetched.unwrap(), definition("fresh"));
        // Now cached; a failing fetcher is never consulted.
        let cached: Result<_, String> =
            cache.get_or_fetch("fresh", Priority::High, || Err("offline".to_string()));
        assert_eq!(cached.unwrap(), definition("fresh"));
        cache.destroy();
    }

    #[test]
    fn test_fetch_errors_pass_through() {
        let cache = quiet_cache();
        let result: Result<TourDefinition, String> =
            cache.get_or_fetch("missing", Priority::Low, || Err("not found".to_string()));
        assert_eq!(result.unwrap_err(), "not found");
        cache.destroy();
    }

    #[test]
    fn test_durable_store_survives_in_process_invalidation() {
        let store = Arc::new(MemoryStore::new());
        let cache: TourCache<TourDefinition> = TourCache::builder()
            .persist_to_durable_store(true)
            .durable_store(store.clone())
            .background_maintenance(false)
            .build();

        cache.set("vip", definition("vip"), Priority::High);
        cache.destroy();
        assert!(store.get("vip").unwrap().is_some());

        // A fresh cache over the same store restores through the chain.
        let revived: TourCache<TourDefinition> = TourCache::builder()
            .durable_store(store)
            .background_maintenance(false)
            .build();
        assert_eq!(revived.get("vip"), Some(definition("vip")));
        assert_eq!(revived.stats().durable_hits, 1);
        revived.destroy();
    }

    #[test]
    fn test_manual_maintenance_sweeps_and_cleans() {
        let cache: TourCache<TourDefinition> = TourCache::builder()
            .ttl_ms(30)
            .inactive_threshold_ms(30)
            .background_maintenance(false)
            .build();

        cache.set("short", definition("short"), Priority::Medium);
        cache.register_instance_sized("idle", 1024, || {});
        cache.set_instance_active("idle", false);

        std::thread::sleep(Duration::from_millis(70));
        cache.run_maintenance_once();

        assert_eq!(cache.stats().hot_entries, 0);
        assert_eq!(cache.memory_stats().total_instances, 0);
        cache.destroy();
    }

    #[test]
    fn test_destroy_releases_instances_and_is_idempotent() {
        let cache = quiet_cache();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        cache.register_instance_sized("live", 1024, move || {
            flag.store(true, Ordering::SeqCst);
        });

        cache.destroy();
        cache.destroy();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clone_shares_state() {
        let cache = quiet_cache();
        let clone = cache.clone();
        cache.set("shared", definition("shared"), Priority::Medium);
        assert_eq!(clone.get("shared"), Some(definition("shared")));
        cache.destroy();
    }

    #[test]
    fn test_stats_json_is_well_formed() {
        let cache = quiet_cache();
        cache.set("t", definition("t"), Priority::Medium);
        cache.get("t");
        cache.get("missing");

        let parsed: serde_json::Value = serde_json::from_str(&cache.stats_json()).unwrap();
        assert_eq!(parsed["hot_hits"], 1);
        assert_eq!(parsed["total_misses"], 1);
        cache.destroy();
    }
}
