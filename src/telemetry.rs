//! Cache statistics with atomic coordination across tiers
//!
//! Counters are derived observability state, never authoritative: the tiers own
//! their accounting and push occupancy gauges here. The average access latency
//! is a running average updated on every recorded operation.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Atomic hit/miss/eviction counters and per-tier occupancy gauges
#[derive(Debug, Default)]
pub struct CacheStatistics {
    /// Hot tier hit count
    hot_hits: CachePadded<AtomicU64>,
    /// Persistent tier hit count (promoted to hot on read)
    persistent_hits: CachePadded<AtomicU64>,
    /// Durable store hit count
    durable_hits: CachePadded<AtomicU64>,
    /// Miss count across the full fallback chain
    total_misses: CachePadded<AtomicU64>,
    /// Entries removed by the eviction policy
    evictions: CachePadded<AtomicU64>,
    /// Entries removed by TTL expiry (lazy or sweep)
    expirations: CachePadded<AtomicU64>,
    /// Entries removed by explicit invalidation
    invalidations: CachePadded<AtomicU64>,
    /// Hot tier entries copied into the persistent tier
    promotions: CachePadded<AtomicU64>,
    /// Persistent tier entries dropped by the optimizer
    demotions: CachePadded<AtomicU64>,
    /// Fire-and-forget durable writes that reported failure
    durable_write_failures: CachePadded<AtomicU64>,
    /// Running average access latency in nanoseconds
    avg_access_latency_ns: CachePadded<AtomicU64>,
    /// Hot tier occupancy gauges
    hot_entries: CachePadded<AtomicU64>,
    hot_bytes: CachePadded<AtomicU64>,
    peak_hot_bytes: CachePadded<AtomicU64>,
    /// Persistent tier occupancy gauge
    persistent_entries: CachePadded<AtomicU64>,
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hot_hits: u64,
    pub persistent_hits: u64,
    pub durable_hits: u64,
    pub total_misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub durable_write_failures: u64,
    pub avg_access_latency_ns: u64,
    pub hot_entries: u64,
    pub hot_bytes: u64,
    pub peak_hot_bytes: u64,
    pub persistent_entries: u64,
    pub hit_rate: f64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hot_hit(&self, access_time_ns: u64) {
        self.hot_hits.fetch_add(1, Ordering::Relaxed);
        self.update_average_latency(access_time_ns);
    }

    pub fn record_persistent_hit(&self, access_time_ns: u64) {
        self.persistent_hits.fetch_add(1, Ordering::Relaxed);
        self.update_average_latency(access_time_ns);
    }

    pub fn record_durable_hit(&self, access_time_ns: u64) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
        self.update_average_latency(access_time_ns);
    }

    pub fn record_miss(&self, access_time_ns: u64) {
        self.total_misses.fetch_add(1, Ordering::Relaxed);
        self.update_average_latency(access_time_ns);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotions(&self, count: u64) {
        self.promotions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_demotions(&self, count: u64) {
        self.demotions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_durable_write_failure(&self) {
        self.durable_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Update hot tier occupancy gauges, tracking the byte peak
    pub fn set_hot_occupancy(&self, entries: u64, bytes: u64) {
        self.hot_entries.store(entries, Ordering::Relaxed);
        self.hot_bytes.store(bytes, Ordering::Relaxed);

        let mut current_peak = self.peak_hot_bytes.load(Ordering::Relaxed);
        while bytes > current_peak {
            match self.peak_hot_bytes.compare_exchange_weak(
                current_peak,
                bytes,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_peak = observed,
            }
        }
    }

    pub fn set_persistent_occupancy(&self, entries: u64) {
        self.persistent_entries.store(entries, Ordering::Relaxed);
    }

    /// Total hits across all tiers
    pub fn total_hits(&self) -> u64 {
        self.hot_hits.load(Ordering::Relaxed)
            + self.persistent_hits.load(Ordering::Relaxed)
            + self.durable_hits.load(Ordering::Relaxed)
    }

    pub fn total_misses(&self) -> u64 {
        self.total_misses.load(Ordering::Relaxed)
    }

    /// Overall hit rate across all recorded lookups
    pub fn hit_rate(&self) -> f64 {
        let hits = self.total_hits();
        let total = hits + self.total_misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hot_hits: self.hot_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            total_misses: self.total_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            durable_write_failures: self.durable_write_failures.load(Ordering::Relaxed),
            avg_access_latency_ns: self.avg_access_latency_ns.load(Ordering::Relaxed),
            hot_entries: self.hot_entries.load(Ordering::Relaxed),
            hot_bytes: self.hot_bytes.load(Ordering::Relaxed),
            peak_hot_bytes: self.peak_hot_bytes.load(Ordering::Relaxed),
            persistent_entries: self.persistent_entries.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }

    /// Exponential running average with a 1/8 weight for the new sample
    fn update_average_latency(&self, access_time_ns: u64) {
        let current = self.avg_access_latency_ns.load(Ordering::Relaxed);
        let updated = if current == 0 {
            access_time_ns
        } else {
            (current * 7 + access_time_ns) / 8
        };
        self.avg_access_latency_ns.store(updated, Ordering::Relaxed);
    }
}
