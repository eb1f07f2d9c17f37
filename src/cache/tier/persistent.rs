//! Persistent tier - promoted in-process entries
//!
//! A secondary map holding high-priority and frequently-accessed entries.
//! It is not budget-limited and its copies are never accounted against the
//! hot tier budget: a persistent copy is a read-only mirror, so demoting it
//! leaves any hot tier copy untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::cache::entry::Priority;

/// A promoted entry with its own access counter
#[derive(Debug)]
pub struct PersistentEntry<V> {
    pub value: V,
    pub size_bytes: u64,
    pub priority: Priority,
    pub created_at: Instant,
    access_count: AtomicU64,
}

impl<V> PersistentEntry<V> {
    fn new(value: V, size_bytes: u64, priority: Priority, created_at: Instant) -> Self {
        Self {
            value,
            size_bytes,
            priority,
            created_at,
            access_count: AtomicU64::new(0),
        }
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }
}

/// A hit from the persistent tier, carrying the metadata needed for promotion
#[derive(Debug)]
pub struct PersistentHit<V> {
    pub value: V,
    pub size_bytes: u64,
    pub priority: Priority,
    pub created_at: Instant,
}

/// Lock-free map of promoted entries keyed by definition id
#[derive(Debug)]
pub struct PersistentTier<V> {
    entries: DashMap<String, PersistentEntry<V>>,
}

impl<V: Clone> PersistentTier<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert or refresh a mirror copy
    ///
    /// `created_at` is carried over from the source entry so the TTL clock
    /// keeps running across tiers.
    pub fn insert(
        &self,
        id: String,
        value: V,
        size_bytes: u64,
        priority: Priority,
        created_at: Instant,
    ) {
        self.entries
            .insert(id, PersistentEntry::new(value, size_bytes, priority, created_at));
    }

    /// Look up a mirror, honoring the TTL
    pub fn get(&self, id: &str, ttl: Duration) -> Option<PersistentHit<V>> {
        let expired = match self.entries.get(id) {
            Some(entry) => entry.created_at.elapsed() > ttl,
            None => return None,
        };

        if expired {
            self.entries.remove(id);
            return None;
        }

        self.entries.get(id).map(|entry| {
            entry.access_count.fetch_add(1, Ordering::Relaxed);
            PersistentHit {
                value: entry.value.clone(),
                size_bytes: entry.size_bytes,
                priority: entry.priority,
                created_at: entry.created_at,
            }
        })
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Remove entries whose id contains the pattern, returning the ids removed
    pub fn remove_matching(&self, pattern: &str) -> Vec<String> {
        let matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().contains(pattern))
            .map(|entry| entry.key().clone())
            .collect();
        for id in &matched {
            self.entries.remove(id);
        }
        matched
    }

    pub fn clear(&self) {
        self.entries.clear();
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

    pub fn all_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Mean access count across the tier, used by the demotion rule
    pub fn average_access_count(&self) -> f64 {
        let len = self.entries.len();
        if len == 0 {
            return 0.0;
        }
        let total: u64 = self.entries.iter().map(|e| e.access_count()).sum();
        total as f64 / len as f64
    }

    /// Drop entries accessed less than the given count, returning how many
    pub fn demote_below(&self, access_floor: f64) -> usize {
        let demoted: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| (entry.access_count() as f64) < access_floor)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &demoted {
            self.entries.remove(id);
        }
        demoted.len()
    }
}

impl<V: Clone> Default for PersistentTier<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_round_trip() {
        let tier = PersistentTier::new();
        tier.insert("t".into(), "def", 32, Priority::High, Instant::now());

        let hit = tier.get("t", Duration::from_secs(60)).unwrap();
        assert_eq!(hit.value, "def");
        assert_eq!(hit.priority, Priority::High);
        assert_eq!(hit.size_bytes, 32);
    }

    #[test]
    fn test_expired_mirror_is_removed_on_read() {
        let tier = PersistentTier::new();
        tier.insert("t".into(), "def", 32, Priority::High, Instant::now());

        std::thread::sleep(Duration::from_millis(30));
        assert!(tier.get("t", Duration::from_millis(10)).is_none());
        assert!(!tier.contains("t"));
    }

    #[test]
    fn test_demotion_drops_cold_mirrors_only() {
        let tier = PersistentTier::new();
        tier.insert("hot".into(), "def", 32, Priority::High, Instant::now());
        tier.insert("cold".into(), "def", 32, Priority::High, Instant::now());
        for _ in 0..4 {
            tier.get("hot", Duration::from_secs(60));
        }

        let demoted = tier.demote_below(2.0);
        assert_eq!(demoted, 1);
        assert!(tier.contains("hot"));
        assert!(!tier.contains("cold"));
    }

    #[test]
    fn test_remove_matching_by_substring() {
        let tier = PersistentTier::new();
        tier.insert("tenant-a:welcome".into(), "def", 8, Priority::High, Instant::now());
        tier.insert("tenant-a:billing".into(), "def", 8, Priority::High, Instant::now());
        tier.insert("tenant-b:welcome".into(), "def", 8, Priority::High, Instant::now());

        let removed = tier.remove_matching("tenant-a:");
        assert_eq!(removed.len(), 2);
        assert!(tier.contains("tenant-b:welcome"));
    }
}
