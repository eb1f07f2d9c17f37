//! Tier coordinator - fallback chain and accounting boundary
//!
//! One coordinator per cache instance. The hot tier and the active config
//! snapshot live behind a single exclusive lock; the persistent tier and the
//! durable store sit outside it. This is also the error boundary of the
//! subsystem: durable failures are logged here and degrade to a miss on read
//! and a no-op on write, so no caller ever sees a fatal cache error.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::config::CacheConfig;
use super::durable::{DurableStore, DurableWriter};
use super::entry::Priority;
use super::eviction::EvictionPolicyEngine;
use super::size;
use super::tier::hot::HotTier;
use super::tier::persistent::PersistentTier;
use crate::telemetry::CacheStatistics;

struct HotState<V> {
    tier: HotTier<V>,
    config: Arc<CacheConfig>,
}

/// Coordinates the hot, persistent and durable tiers for one cache instance
pub struct CacheCoordinator<V> {
    state: Mutex<HotState<V>>,
    persistent: PersistentTier<V>,
    policy: EvictionPolicyEngine,
    stats: Arc<CacheStatistics>,
    durable: DurableWriter,
    /// Initial byte budget; the optimizer may grow the live budget to 2x this.
    initial_max_size_bytes: u64,
}

impl<V> CacheCoordinator<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, store: Arc<dyn DurableStore>) -> Self {
        let config = config.validated();
        let stats = Arc::new(CacheStatistics::new());
        let policy = EvictionPolicyEngine::new(config.eviction_policy);
        let durable = DurableWriter::spawn(store, stats.clone());
        let initial_max_size_bytes = config.max_size_bytes;

        Self {
            state: Mutex::new(HotState {
                tier: HotTier::new(),
                config: Arc::new(config),
            }),
            persistent: PersistentTier::new(),
            policy,
            stats,
            durable,
            initial_max_size_bytes,
        }
    }

    /// Look up a definition through the full fallback chain
    ///
    /// Hot tier first; then the persistent tier, promoting the mirror back
    /// into the hot tier; then the durable store, promoting into the hot tier
    /// and, for a still-high-priority entry, into the persistent tier. A miss
    /// here means the caller must fetch from the authoritative object source
    /// and push the result back via [`set`](Self::set).
    pub fn get(&self, id: &str) -> Option<V> {
        let started = Instant::now();

        {
            let mut state = self.lock_state();
            let ttl = state.config.ttl();
            let hit = state.tier.get(id, ttl, &self.stats);
            self.publish_occupancy(&state);
            if let Some(value) = hit {
                self.stats.record_hot_hit(elapsed_ns(started));
                return Some(value);
            }
        }

        if let Some(value) = self.get_from_persistent(id) {
            self.stats.record_persistent_hit(elapsed_ns(started));
            return Some(value);
        }

        if let Some(value) = self.get_from_durable(id) {
            self.stats.record_durable_hit(elapsed_ns(started));
            return Some(value);
        }

        self.stats.record_miss(elapsed_ns(started));
        None
    }

    /// Hot tier lookup only, without consulting the lower tiers
    pub fn get_hot(&self, id: &str) -> Option<V> {
        let started = Instant::now();
        let mut state = self.lock_state();
        let ttl = state.config.ttl();
        match state.tier.get(id, ttl, &self.stats) {
            Some(value) => {
                self.publish_occupancy(&state);
                self.stats.record_hot_hit(elapsed_ns(started));
                Some(value)
            }
            None => {
                self.publish_occupancy(&state);
                self.stats.record_miss(elapsed_ns(started));
                None
            }
        }
    }

    /// Insert a definition, evicting first if the budget requires it
    ///
    /// High-priority entries are mirrored into the persistent tier; when the
    /// config enables it, the encoded bytes are also dispatched fire-and-forget
    /// to the durable store. Storage failures never reach the caller.
    pub fn set(&self, id: &str, value: V, priority: Priority) {
        let encoded = match size::try_encode(&value) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log::warn!("failed to encode definition '{}': {}", id, err);
                None
            }
        };
        let size_bytes = encoded
            .as_ref()
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(size::DEFAULT_SIZE_ESTIMATE);

        let persist = {
            let mut state = self.lock_state();
            let config = state.config.clone();
            state.tier.insert(
                id.to_string(),
                value.clone(),
                size_bytes,
                priority,
                &config,
                &self.policy,
                &self.stats,
            );
            self.publish_occupancy(&state);
            config.persist_to_durable_store
        };

        if priority == Priority::High {
            self.persistent
                .insert(id.to_string(), value, size_bytes, priority, Instant::now());
            self.stats.set_persistent_occupancy(self.persistent.len() as u64);
        }

        if persist {
            match encoded {
                Some(bytes) => self.durable.enqueue_put(id.to_string(), bytes),
                None => log::debug!("skipping durable write for unencodable '{}'", id),
            }
        }
    }

    /// Whether the id is currently resident in either in-process tier
    pub fn contains(&self, id: &str) -> bool {
        self.lock_state().tier.contains(id) || self.persistent.contains(id)
    }

    /// Remove the given ids from every tier; unknown ids are a no-op
    pub fn invalidate(&self, ids: &[&str]) {
        let mut removed = 0u64;
        {
            let mut state = self.lock_state();
            for id in ids {
                if state.tier.remove(id).is_some() {
                    removed += 1;
                }
            }
            self.publish_occupancy(&state);
        }
        for id in ids {
            self.persistent.remove(id);
            self.durable.enqueue_remove(id.to_string());
        }
        self.stats.set_persistent_occupancy(self.persistent.len() as u64);
        self.stats.record_invalidations(removed);
    }

    /// Remove every entry whose id contains the pattern
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let hot_matched = {
            let mut state = self.lock_state();
            let matched = state.tier.matching_ids(pattern);
            for id in &matched {
                state.tier.remove(id);
            }
            self.publish_occupancy(&state);
            matched
        };

        let persistent_matched = self.persistent.remove_matching(pattern);
        self.stats.set_persistent_occupancy(self.persistent.len() as u64);

        let mut all: Vec<String> = hot_matched;
        for id in persistent_matched {
            if !all.contains(&id) {
                all.push(id);
            }
        }
        for id in &all {
            self.durable.enqueue_remove(id.clone());
        }
        self.stats.record_invalidations(all.len() as u64);
        all.len()
    }

    /// Remove everything from every tier
    ///
    /// The durable store exposes no bulk clear, so removal covers every id
    /// currently known to the in-process tiers.
    pub fn invalidate_all(&self) {
        let hot_ids = {
            let mut state = self.lock_state();
            let ids = state.tier.all_ids();
            let removed = state.tier.clear();
            self.publish_occupancy(&state);
            self.stats.record_invalidations(removed as u64);
            ids
        };

        let mut ids = hot_ids;
        for id in self.persistent.all_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.persistent.clear();
        self.stats.set_persistent_occupancy(0);

        for id in ids {
            self.durable.enqueue_remove(id);
        }
    }

    /// Eagerly sweep expired entries out of the hot tier
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.lock_state();
        let ttl = state.config.ttl();
        let removed = state.tier.sweep_expired(ttl);
        if removed > 0 {
            self.stats.record_expirations(removed as u64);
            self.publish_occupancy(&state);
        }
        removed
    }

    /// Copy hot entries accessed more than `factor` times the tier average
    /// into the persistent tier
    pub fn promote_frequent(&self, factor: f64) -> usize {
        let promoted: Vec<(String, V, u64, Priority, Instant)> = {
            let state = self.lock_state();
            let average = state.tier.average_access_count();
            if average <= 0.0 {
                return 0;
            }
            let floor = factor * average;
            state
                .tier
                .entries()
                .iter()
                .filter(|(id, entry)| {
                    (entry.access_count as f64) > floor && !self.persistent.contains(id)
                })
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        entry.value.clone(),
                        entry.size_bytes,
                        entry.priority,
                        entry.created_at,
                    )
                })
                .collect()
        };

        for (id, value, size_bytes, priority, created_at) in &promoted {
            self.persistent
                .insert(id.clone(), value.clone(), *size_bytes, *priority, *created_at);
        }
        if !promoted.is_empty() {
            self.stats.record_promotions(promoted.len() as u64);
            self.stats.set_persistent_occupancy(self.persistent.len() as u64);
        }
        promoted.len()
    }

    /// Drop persistent entries accessed less than `factor` times the tier
    /// average; hot tier copies are unaffected
    pub fn demote_infrequent(&self, factor: f64) -> usize {
        let average = self.persistent.average_access_count();
        if average <= 0.0 {
            return 0;
        }
        let demoted = self.persistent.demote_below(factor * average);
        if demoted > 0 {
            self.stats.record_demotions(demoted as u64);
            self.stats.set_persistent_occupancy(self.persistent.len() as u64);
        }
        demoted
    }

    /// Current active config snapshot
    pub fn config_snapshot(&self) -> Arc<CacheConfig> {
        self.lock_state().config.clone()
    }

    /// Install a new validated config snapshot
    pub fn install_config(&self, config: CacheConfig) {
        let config = config.validated();
        let mut state = self.lock_state();
        log::info!(
            "cache '{}': installing new config snapshot (max_size_bytes {} -> {})",
            state.config.cache_id,
            state.config.max_size_bytes,
            config.max_size_bytes
        );
        state.config = Arc::new(config);
    }

    /// Hot tier occupancy as (entries, bytes)
    pub fn hot_occupancy(&self) -> (usize, u64) {
        let state = self.lock_state();
        (state.tier.len(), state.tier.bytes())
    }

    pub fn stats(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    pub fn policy(&self) -> &EvictionPolicyEngine {
        &self.policy
    }

    /// Hard ceiling for optimizer budget growth
    pub fn budget_ceiling(&self) -> u64 {
        self.initial_max_size_bytes.saturating_mul(2)
    }

    /// Bounded best-effort durable flush, then stop the write service
    pub fn shutdown(&self, timeout: std::time::Duration) {
        self.durable.shutdown(timeout);
    }

    fn get_from_persistent(&self, id: &str) -> Option<V> {
        let ttl = self.lock_state().config.ttl();
        let hit = self.persistent.get(id, ttl)?;

        // Promote the mirror back into the hot tier, keeping the TTL clock
        // running from the original creation time.
        let mut state = self.lock_state();
        let config = state.config.clone();
        state.tier.restore(
            id.to_string(),
            hit.value.clone(),
            hit.size_bytes,
            hit.priority,
            hit.created_at,
            &config,
            &self.policy,
            &self.stats,
        );
        self.publish_occupancy(&state);
        Some(hit.value)
    }

    fn get_from_durable(&self, id: &str) -> Option<V> {
        let bytes = match self.durable.read(id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                // Error boundary: a failing backend reads as a miss.
                log::warn!("durable read for '{}' failed, treating as miss: {}", id, err);
                return None;
            }
        };

        let value: V = match size::try_decode(&bytes) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("durable bytes for '{}' are undecodable, treating as miss: {}", id, err);
                return None;
            }
        };

        // Durable copies carry no timestamps; a restored entry starts a fresh
        // TTL window. Entries in the durable store were written as high
        // priority, so the restore also refreshes the persistent mirror.
        let size_bytes = bytes.len() as u64;
        {
            let mut state = self.lock_state();
            let config = state.config.clone();
            state.tier.insert(
                id.to_string(),
                value.clone(),
                size_bytes,
                Priority::High,
                &config,
                &self.policy,
                &self.stats,
            );
            self.publish_occupancy(&state);
        }
        self.persistent
            .insert(id.to_string(), value.clone(), size_bytes, Priority::High, Instant::now());
        self.stats.set_persistent_occupancy(self.persistent.len() as u64);

        Some(value)
    }

    fn lock_state(&self) -> MutexGuard<'_, HotState<V>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_occupancy(&self, state: &MutexGuard<'_, HotState<V>>) {
        self.stats
            .set_hot_occupancy(state.tier.len() as u64, state.tier.bytes());
    }
}

impl<V> std::fmt::Debug for CacheCoordinator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator").finish_non_exhaustive()
    }
}

fn elapsed_ns(started: Instant) -> u64 {
    started.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::EvictionPolicyType;
    use crate::cache::durable::MemoryStore;
    use std::time::Duration;

    fn coordinator(config: CacheConfig) -> CacheCoordinator<String> {
        CacheCoordinator::new(config, Arc::new(MemoryStore::new()))
    }

    fn small_config() -> CacheConfig {
        CacheConfig {
            max_size_bytes: 4096,
            max_entries: 8,
            ttl_ms: 60_000,
            eviction_policy: EvictionPolicyType::Lru,
            persist_to_durable_store: true,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_set_get_round_trip() {
        let cache = coordinator(small_config());
        cache.set("welcome", "definition".to_string(), Priority::Medium);
        assert_eq!(cache.get("welcome"), Some("definition".to_string()));
    }

    #[test]
    fn test_miss_returns_none_and_counts() {
        let cache = coordinator(small_config());
        assert_eq!(cache.get("absent"), None);
        assert_eq!(cache.stats().snapshot().total_misses, 1);
    }

    #[test]
    fn test_high_priority_set_mirrors_to_persistent_and_durable() {
        let store = Arc::new(MemoryStore::new());
        let cache: CacheCoordinator<String> =
            CacheCoordinator::new(small_config(), store.clone());

        cache.set("vip", "def".to_string(), Priority::High);
        assert!(cache.persistent.contains("vip"));

        assert!(cache.durable.flush(Duration::from_secs(2)));
        assert!(store.get("vip").unwrap().is_some());
    }

    #[test]
    fn test_fallback_promotes_from_persistent() {
        let cache = coordinator(small_config());
        cache.set("vip", "def".to_string(), Priority::High);

        // Drop the hot copy only; the persistent mirror must answer and the
        // entry must be promoted back into the hot tier.
        cache.lock_state().tier.remove("vip");
        assert_eq!(cache.get("vip"), Some("def".to_string()));
        assert!(cache.lock_state().tier.contains("vip"));
        assert_eq!(cache.stats().snapshot().persistent_hits, 1);
    }

    #[test]
    fn test_fallback_reads_durable_store() {
        let store = Arc::new(MemoryStore::new());
        let bytes = crate::cache::size::try_encode(&"cold".to_string()).unwrap();
        store.put("archived", &bytes).unwrap();

        let cache: CacheCoordinator<String> = CacheCoordinator::new(small_config(), store);
        assert_eq!(cache.get("archived"), Some("cold".to_string()));
        // Restored through the chain: hot and persistent now both hold it.
        assert!(cache.lock_state().tier.contains("archived"));
        assert!(cache.persistent.contains("archived"));
        assert_eq!(cache.stats().snapshot().durable_hits, 1);
    }

    #[test]
    fn test_invalidate_removes_exactly_matching_ids() {
        let store = Arc::new(MemoryStore::new());
        let cache: CacheCoordinator<String> =
            CacheCoordinator::new(small_config(), store.clone());

        cache.set("a", "1".to_string(), Priority::High);
        cache.set("b", "2".to_string(), Priority::Medium);
        cache.invalidate(&["a", "ghost"]);
        assert!(cache.durable.flush(Duration::from_secs(2)));

        assert_eq!(cache.get_hot("a"), None);
        assert_eq!(cache.get_hot("b"), Some("2".to_string()));
        assert!(!cache.persistent.contains("a"));
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_invalidate_pattern_scopes_to_matches() {
        let cache = coordinator(small_config());
        cache.set("tenant-a:welcome", "1".to_string(), Priority::Medium);
        cache.set("tenant-a:billing", "2".to_string(), Priority::Medium);
        cache.set("tenant-b:welcome", "3".to_string(), Priority::Medium);

        let removed = cache.invalidate_pattern("tenant-a:");
        assert_eq!(removed, 2);
        assert_eq!(cache.get_hot("tenant-b:welcome"), Some("3".to_string()));
        assert_eq!(cache.get_hot("tenant-a:welcome"), None);
    }

    #[test]
    fn test_ttl_expiry_after_sleep() {
        let config = CacheConfig {
            ttl_ms: 50,
            ..small_config()
        };
        let cache = coordinator(config);
        cache.set("short", "def".to_string(), Priority::Medium);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.get("short"), None);
        assert!(!cache.lock_state().tier.contains("short"));
        assert_eq!(cache.stats().snapshot().expirations, 1);
    }

    #[test]
    fn test_promotion_does_not_restart_ttl() {
        let config = CacheConfig {
            ttl_ms: 80,
            persist_to_durable_store: false,
            ..small_config()
        };
        let cache = coordinator(config);
        cache.set("vip", "def".to_string(), Priority::High);
        cache.lock_state().tier.remove("vip");

        // Promote from the persistent mirror mid-lifetime.
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("vip"), Some("def".to_string()));

        // The promoted copy keeps the original creation time, so the entry
        // still expires on the original schedule.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("vip"), None);
    }

    #[test]
    fn test_promote_and_demote_cycle() {
        let cache = coordinator(small_config());
        cache.set("hot", "1".to_string(), Priority::Medium);
        cache.set("cold", "2".to_string(), Priority::Medium);
        for _ in 0..6 {
            cache.get("hot");
        }

        // "hot" is well above 1.5x the tier average, "cold" well below.
        assert_eq!(cache.promote_frequent(1.5), 1);
        assert!(cache.persistent.contains("hot"));

        // Mirrors start cold, so a demotion pass with no persistent reads
        // clears nothing (average is zero).
        assert_eq!(cache.demote_infrequent(0.5), 0);

        cache.persistent.get("hot", Duration::from_secs(60));
        cache.set("idle", "3".to_string(), Priority::High);
        assert_eq!(cache.demote_infrequent(0.5), 1);
        assert!(!cache.persistent.contains("idle"));
        assert!(cache.persistent.contains("hot"));
    }

    #[test]
    fn test_config_snapshot_replacement() {
        let cache = coordinator(small_config());
        let before = cache.config_snapshot();

        let mut grown = (*before).clone();
        grown.max_size_bytes = before.max_size_bytes * 2;
        cache.install_config(grown);

        let after = cache.config_snapshot();
        assert_eq!(after.max_size_bytes, before.max_size_bytes * 2);
    }
}
