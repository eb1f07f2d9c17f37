//! Cache entry metadata and priority classes

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Entry priority class; lower ranks are evicted first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

impl Priority {
    /// Numeric eviction rank; the lowest rank is the first victim
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// A hot tier entry and its access metadata
///
/// An entry is owned by the tier it resides in. A high-priority entry may have
/// a read-only mirror in the persistent tier; the mirror is not accounted
/// against the hot tier byte budget.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub size_bytes: u64,
    pub priority: Priority,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, size_bytes: u64, priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            size_bytes,
            priority,
        }
    }

    /// Whether the entry has outlived the configured TTL
    pub fn expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    /// Record a read access
    pub fn touch(&mut self) {
        self.last_accessed_at = Instant::now();
        self.access_count += 1;
    }
}
