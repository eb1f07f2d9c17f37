//! Hot tier - primary in-process cache map
//!
//! Owned exclusively by the coordinator's per-instance lock. Accounting
//! invariants are enforced before every insert (evict-then-insert): after any
//! `insert` settles, `len() <= max_entries` and `bytes() <= max_size_bytes`
//! unless a single entry alone exceeds the budget, which is accepted as a soft
//! overrun rather than an error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, Priority};
use crate::cache::eviction::EvictionPolicyEngine;
use crate::telemetry::CacheStatistics;

/// Budget-bounded hot tier map keyed by definition id
#[derive(Debug)]
pub struct HotTier<V> {
    entries: HashMap<String, CacheEntry<V>>,
    total_bytes: u64,
}

impl<V: Clone> HotTier<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
        }
    }

    /// Look up an entry, enforcing lazy TTL expiry
    ///
    /// An expired entry is removed and reported as a miss; a live entry has its
    /// access metadata updated before its value is returned.
    pub fn get(&mut self, id: &str, ttl: Duration, stats: &CacheStatistics) -> Option<V> {
        let expired = match self.entries.get(id) {
            Some(entry) => entry.expired(ttl),
            None => return None,
        };

        if expired {
            self.remove(id);
            stats.record_expirations(1);
            return None;
        }

        let entry = self.entries.get_mut(id)?;
        entry.touch();
        Some(entry.value.clone())
    }

    /// Insert an entry, evicting first until the budget admits it
    pub fn insert(
        &mut self,
        id: String,
        value: V,
        size_bytes: u64,
        priority: Priority,
        config: &CacheConfig,
        policy: &EvictionPolicyEngine,
        stats: &CacheStatistics,
    ) {
        self.restore(id, value, size_bytes, priority, Instant::now(), config, policy, stats);
    }

    /// Insert an entry with a carried creation time
    ///
    /// Used when promoting from a lower tier: the TTL clock keeps running
    /// across tiers, so a promoted copy must not restart it.
    pub fn restore(
        &mut self,
        id: String,
        value: V,
        size_bytes: u64,
        priority: Priority,
        created_at: Instant,
        config: &CacheConfig,
        policy: &EvictionPolicyEngine,
        stats: &CacheStatistics,
    ) {
        // Replacing an id releases its old accounting before space is checked.
        if let Some(previous) = self.entries.remove(&id) {
            self.total_bytes = self.total_bytes.saturating_sub(previous.size_bytes);
        }

        self.ensure_space(size_bytes, config, policy, stats);

        self.total_bytes += size_bytes;
        self.entries.insert(
            id,
            CacheEntry {
                value,
                created_at,
                last_accessed_at: Instant::now(),
                access_count: 0,
                size_bytes,
                priority,
            },
        );
    }

    /// Evict until the required bytes and one entry slot fit the budget
    ///
    /// An empty tier that still cannot satisfy the request is not an error;
    /// the caller inserts anyway and the budget is treated as a soft target.
    fn ensure_space(
        &mut self,
        required: u64,
        config: &CacheConfig,
        policy: &EvictionPolicyEngine,
        stats: &CacheStatistics,
    ) {
        while !self.entries.is_empty()
            && (self.entries.len() >= config.max_entries
                || self.total_bytes + required > config.max_size_bytes)
        {
            match policy.select_victim(&self.entries) {
                Some(victim) => {
                    log::debug!(
                        "evicting '{}' from hot tier under {:?} policy",
                        victim,
                        policy.active_policy()
                    );
                    self.remove(&victim);
                    stats.record_evictions(1);
                }
                None => break,
            }
        }
    }

    /// Remove a single entry, returning it for inspection
    pub fn remove(&mut self, id: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(id)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Eagerly remove every expired entry, returning the count removed
    pub fn sweep_expired(&mut self, ttl: Duration) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expired(ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    /// Ids matching a substring pattern
    pub fn matching_ids(&self, pattern: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|id| id.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.total_bytes = 0;
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn entries(&self) -> &HashMap<String, CacheEntry<V>> {
        &self.entries
    }

    /// Mean access count across the tier, used by the promotion rule
    pub fn average_access_count(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let total: u64 = self.entries.values().map(|e| e.access_count).sum();
        total as f64 / self.entries.len() as f64
    }
}

impl<V: Clone> Default for HotTier<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::EvictionPolicyType;

    fn fixture() -> (CacheConfig, EvictionPolicyEngine, CacheStatistics) {
        let config = CacheConfig {
            max_size_bytes: 1024,
            max_entries: 3,
            ttl_ms: 60_000,
            eviction_policy: EvictionPolicyType::Lru,
            ..CacheConfig::default()
        };
        let policy = EvictionPolicyEngine::new(config.eviction_policy);
        (config, policy, CacheStatistics::new())
    }

    #[test]
    fn test_insert_settles_within_entry_bound() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        for i in 0..10 {
            tier.insert(
                format!("tour-{}", i),
                "def",
                64,
                Priority::Medium,
                &config,
                &policy,
                &stats,
            );
        }
        assert!(tier.len() <= config.max_entries);
        assert!(tier.bytes() <= config.max_size_bytes);
    }

    #[test]
    fn test_insert_settles_within_byte_budget() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        tier.insert("a".into(), "def", 600, Priority::Medium, &config, &policy, &stats);
        tier.insert("b".into(), "def", 600, Priority::Medium, &config, &policy, &stats);

        assert!(tier.bytes() <= config.max_size_bytes);
        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
    }

    #[test]
    fn test_oversized_entry_is_still_inserted() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        tier.insert("huge".into(), "def", 4096, Priority::Low, &config, &policy, &stats);

        assert!(tier.contains("huge"));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_lru_eviction_order_end_to_end() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        for id in ["a", "b", "c", "d"] {
            tier.insert(id.into(), "def", 64, Priority::Medium, &config, &policy, &stats);
            std::thread::sleep(Duration::from_millis(2));
        }

        assert!(!tier.contains("a"));
        for id in ["b", "c", "d"] {
            assert!(tier.contains(id), "expected '{}' to survive", id);
        }
    }

    #[test]
    fn test_priority_entry_survives_until_lower_ranks_exhausted() {
        let (mut config, _, stats) = fixture();
        config.eviction_policy = EvictionPolicyType::Priority;
        let policy = EvictionPolicyEngine::new(config.eviction_policy);

        let mut tier = HotTier::new();
        tier.insert("keep".into(), "def", 64, Priority::High, &config, &policy, &stats);
        for i in 0..6 {
            tier.insert(
                format!("filler-{}", i),
                "def",
                64,
                if i % 2 == 0 { Priority::Low } else { Priority::Medium },
                &config,
                &policy,
                &stats,
            );
        }

        assert!(tier.contains("keep"));
        let survivors = tier.all_ids();
        assert_eq!(survivors.len(), config.max_entries);
    }

    #[test]
    fn test_get_expires_lazily() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        tier.insert("t".into(), "def", 8, Priority::Medium, &config, &policy, &stats);

        std::thread::sleep(Duration::from_millis(60));
        assert!(tier.get("t", Duration::from_millis(50), &stats).is_none());
        assert!(!tier.contains("t"));
        assert_eq!(tier.bytes(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        tier.insert("old".into(), "def", 8, Priority::Medium, &config, &policy, &stats);
        std::thread::sleep(Duration::from_millis(60));
        tier.insert("new".into(), "def", 8, Priority::Medium, &config, &policy, &stats);

        let removed = tier.sweep_expired(Duration::from_millis(50));
        assert_eq!(removed, 1);
        assert!(!tier.contains("old"));
        assert!(tier.contains("new"));
    }

    #[test]
    fn test_replacing_entry_releases_old_bytes() {
        let (config, policy, stats) = fixture();
        let mut tier = HotTier::new();
        tier.insert("t".into(), "v1", 500, Priority::Medium, &config, &policy, &stats);
        tier.insert("t".into(), "v2", 100, Priority::Medium, &config, &policy, &stats);

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.bytes(), 100);
    }
}
