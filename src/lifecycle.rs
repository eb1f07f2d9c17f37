//! Memory lifecycle management for live tour instances
//!
//! Tracks runtime instances built from cached definitions, distinct from the
//! raw cached values, so total live memory can be bounded. Each registration
//! supplies a release callback; the manager guarantees it fires exactly once
//! across the instance's life, whether through explicit unregister, pressure
//! cleanup, idle cleanup, or manager shutdown. A callback that panics is
//! contained and logged, and its bookkeeping is still cleared.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use crate::cache::config::LifecycleConfig;
use crate::cache::error::CacheError;
use crate::cache::size;

/// Release callback supplied by the instance owner, invoked at most once
pub type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// Instance memory pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PressureLevel {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
}

/// Aggregate memory statistics for registered instances
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    pub total_instances: usize,
    pub active_instances: usize,
    pub total_memory_mb: f64,
    pub average_memory_bytes: f64,
    pub oldest_instance_age_ms: u64,
    pub pressure_level: PressureLevel,
}

/// Result of a pressure-driven cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureCleanup {
    pub removed: usize,
    pub bytes_freed: u64,
}

struct TourInstance {
    size_bytes: u64,
    created_at: Instant,
    last_accessed_at: Instant,
    #[allow(dead_code)] // Instance bookkeeping - access counts kept for ranking diagnostics
    access_count: u64,
    is_active: bool,
    release: Option<ReleaseFn>,
}

impl TourInstance {
    fn new(size_bytes: u64, release: ReleaseFn) -> Self {
        let now = Instant::now();
        Self {
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            is_active: true,
            release: Some(release),
        }
    }
}

/// Bounds the memory held by live tour instances via pressure-based eviction
pub struct TourLifecycleManager {
    instances: Mutex<HashMap<String, TourInstance>>,
    config: LifecycleConfig,
}

impl TourLifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Register a runtime instance, estimating its size from the payload
    pub fn register_instance<P: Serialize>(
        &self,
        id: impl Into<String>,
        payload: &P,
        release: impl FnOnce() + Send + 'static,
    ) {
        self.register_instance_sized(id, size::estimate(payload), release);
    }

    /// Register a runtime instance with a caller-supplied size
    ///
    /// An id can hold at most one live registration: re-registering releases
    /// the previous instance first. When the instance count is at its bound,
    /// the single least-recently-used instance is evicted; when the projected
    /// memory total exceeds the budget, pressure-ranked instances are freed
    /// until the post-insert total fits under 80% of the pressure threshold.
    pub fn register_instance_sized(
        &self,
        id: impl Into<String>,
        size_bytes: u64,
        release: impl FnOnce() + Send + 'static,
    ) {
        let id = id.into();
        // Releases are deferred until the lock is dropped so a callback that
        // re-enters the manager cannot deadlock it.
        let mut pending: Vec<(String, Option<ReleaseFn>)> = Vec::new();
        let mut instances = self.lock();

        if let Some(previous) = instances.remove(&id) {
            log::debug!("re-registering live instance '{}', releasing previous", id);
            pending.push((id.clone(), previous.release));
        }

        if instances.len() >= self.config.max_instances {
            if let Some(victim) = instances
                .iter()
                .min_by_key(|(_, instance)| instance.last_accessed_at)
                .map(|(victim_id, _)| victim_id.clone())
            {
                log::debug!(
                    "instance bound {} reached, evicting least recently used '{}'",
                    self.config.max_instances,
                    victim
                );
                if let Some(evicted) = instances.remove(&victim) {
                    pending.push((victim, evicted.release));
                }
            }
        }

        let total: u64 = instances.values().map(|i| i.size_bytes).sum();
        if total + size_bytes > self.config.max_memory_usage {
            let target = ((self.config.pressure_threshold() as f64 * 0.8) as u64)
                .saturating_sub(size_bytes);
            let freed = Self::evict_under_pressure(&mut instances, target, &mut pending);
            log::info!(
                "memory budget exceeded registering '{}'; freed {} instances / {} bytes",
                id,
                freed.removed,
                freed.bytes_freed
            );
        }

        instances.insert(id, TourInstance::new(size_bytes, Box::new(release)));
        drop(instances);

        for (released_id, release) in pending {
            Self::invoke_release(&released_id, release);
        }
    }

    /// Record an access to a live instance
    pub fn access_instance(&self, id: &str) -> bool {
        let mut instances = self.lock();
        match instances.get_mut(id) {
            Some(instance) => {
                instance.last_accessed_at = Instant::now();
                instance.access_count += 1;
                true
            }
            None => false,
        }
    }

    /// Flip the active flag; activation refreshes the access timestamp
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        let mut instances = self.lock();
        match instances.get_mut(id) {
            Some(instance) => {
                instance.is_active = active;
                if active {
                    instance.last_accessed_at = Instant::now();
                }
                true
            }
            None => false,
        }
    }

    /// Unregister and release an instance
    ///
    /// Idempotent: a second call for the same id is a no-op and the release
    /// callback fires exactly once.
    pub fn unregister_instance(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(instance) => {
                Self::invoke_release(id, instance.release);
                true
            }
            None => false,
        }
    }

    /// Remove every inactive instance idle past the configured threshold
    pub fn cleanup_inactive_tours(&self) -> usize {
        let threshold = self.config.inactive_threshold();
        let mut pending: Vec<(String, Option<ReleaseFn>)> = Vec::new();
        let mut instances = self.lock();
        let idle: Vec<String> = instances
            .iter()
            .filter(|(_, instance)| {
                !instance.is_active && instance.last_accessed_at.elapsed() > threshold
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            if let Some(instance) = instances.remove(id) {
                pending.push((id.clone(), instance.release));
            }
        }
        drop(instances);

        let removed = pending.len();
        for (id, release) in pending {
            Self::invoke_release(&id, release);
        }
        if removed > 0 {
            log::debug!("cleaned up {} inactive tour instances", removed);
        }
        removed
    }

    /// Evict instances until total memory sits at or under 80% of the
    /// pressure threshold; below the threshold this is a no-op
    pub fn cleanup_by_memory_pressure(&self) -> PressureCleanup {
        let threshold = self.config.pressure_threshold();
        let mut instances = self.lock();
        let total: u64 = instances.values().map(|i| i.size_bytes).sum();
        if total < threshold {
            return PressureCleanup::default();
        }

        let target = (threshold as f64 * 0.8) as u64;
        let mut pending: Vec<(String, Option<ReleaseFn>)> = Vec::new();
        let cleaned = Self::evict_under_pressure(&mut instances, target, &mut pending);
        drop(instances);

        for (id, release) in pending {
            Self::invoke_release(&id, release);
        }
        log::info!(
            "memory pressure cleanup removed {} instances, freed {} bytes",
            cleaned.removed,
            cleaned.bytes_freed
        );
        cleaned
    }

    /// Aggregate memory statistics for the registered instances
    pub fn memory_stats(&self) -> MemoryStats {
        let instances = self.lock();
        let total_instances = instances.len();
        let active_instances = instances.values().filter(|i| i.is_active).count();
        let total_bytes: u64 = instances.values().map(|i| i.size_bytes).sum();
        let oldest_instance_age_ms = instances
            .values()
            .map(|i| i.created_at.elapsed().as_millis() as u64)
            .max()
            .unwrap_or(0);
        let average_memory_bytes = if total_instances == 0 {
            0.0
        } else {
            total_bytes as f64 / total_instances as f64
        };

        MemoryStats {
            total_instances,
            active_instances,
            total_memory_mb: total_bytes as f64 / (1024.0 * 1024.0),
            average_memory_bytes,
            oldest_instance_age_ms,
            pressure_level: Self::classify_pressure(total_bytes, self.config.pressure_threshold()),
        }
    }

    /// Current pressure classification without the full stats payload
    pub fn pressure_level(&self) -> PressureLevel {
        let total: u64 = self.lock().values().map(|i| i.size_bytes).sum();
        Self::classify_pressure(total, self.config.pressure_threshold())
    }

    /// Release every remaining instance; used at shutdown
    pub fn release_all(&self) -> usize {
        let drained: Vec<(String, TourInstance)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, instance) in drained {
            Self::invoke_release(&id, instance.release);
        }
        if count > 0 {
            log::debug!("released {} remaining instances at shutdown", count);
        }
        count
    }

    fn classify_pressure(total_bytes: u64, threshold: u64) -> PressureLevel {
        if total_bytes > threshold {
            PressureLevel::High
        } else if total_bytes as f64 > threshold as f64 * 0.7 {
            PressureLevel::Medium
        } else {
            PressureLevel::Low
        }
    }

    /// Evict pressure-ranked instances (inactive first, then oldest access)
    /// until total memory is at or under `target_bytes`
    ///
    /// Callbacks are handed back through `pending` for the caller to invoke
    /// once the instance lock has been dropped.
    fn evict_under_pressure(
        instances: &mut HashMap<String, TourInstance>,
        target_bytes: u64,
        pending: &mut Vec<(String, Option<ReleaseFn>)>,
    ) -> PressureCleanup {
        let mut ranked: Vec<(String, bool, Instant)> = instances
            .iter()
            .map(|(id, instance)| (id.clone(), instance.is_active, instance.last_accessed_at))
            .collect();
        ranked.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));

        let mut total: u64 = instances.values().map(|i| i.size_bytes).sum();
        let mut cleaned = PressureCleanup::default();
        for (id, _, _) in ranked {
            if total <= target_bytes {
                break;
            }
            if let Some(instance) = instances.remove(&id) {
                total = total.saturating_sub(instance.size_bytes);
                cleaned.removed += 1;
                cleaned.bytes_freed += instance.size_bytes;
                pending.push((id, instance.release));
            }
        }
        cleaned
    }

    /// Invoke a release callback behind a panic guard
    ///
    /// A panicking callback must never leak manager state: the error is logged
    /// and removal proceeds as if the release succeeded.
    fn invoke_release(id: &str, release: Option<ReleaseFn>) {
        if let Some(release) = release {
            if std::panic::catch_unwind(AssertUnwindSafe(release)).is_err() {
                log::warn!(
                    "{}; bookkeeping cleared anyway",
                    CacheError::ReleaseCallback(id.to_string())
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TourInstance>> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TourLifecycleManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for TourLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TourLifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
