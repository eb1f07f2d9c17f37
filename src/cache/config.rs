//! Cache and lifecycle configuration types
//!
//! Configuration snapshots are immutable once built. The optimizer replaces a
//! snapshot with a new validated one, it never mutates in place. Invalid values
//! are clamped to documented defaults with a logged warning; construction never
//! fails on bad input.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::CacheError;

/// Log one clamped-field warning in the shared error format
fn warn_clamped(field: &str, value: impl std::fmt::Display, reason: impl Into<String>) {
    log::warn!(
        "{}",
        CacheError::InvalidConfigValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    );
}

/// Eviction policy selection for the hot tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicyType {
    /// Least Recently Used policy
    #[serde(rename = "lru")]
    Lru,
    /// Least Frequently Used policy
    #[serde(rename = "lfu")]
    Lfu,
    /// Oldest entry first (TTL-oldest)
    #[serde(rename = "ttl")]
    Ttl,
    /// Lowest priority rank first, LRU within a rank
    #[serde(rename = "priority")]
    Priority,
}

/// Hot tier and durable persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Identifier used for log context and default storage paths
    pub cache_id: String,
    /// Soft byte budget for the hot tier
    pub max_size_bytes: u64,
    /// Entry count bound for the hot tier
    pub max_entries: usize,
    /// Entry time-to-live in milliseconds, measured from creation
    pub ttl_ms: u64,
    pub eviction_policy: EvictionPolicyType,
    /// Write high-priority entries through to the durable store
    pub persist_to_durable_store: bool,
}

/// Lifecycle manager configuration for registered runtime instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Maximum number of live registrations
    pub max_instances: usize,
    /// Total memory budget for live instances, in bytes
    pub max_memory_usage: u64,
    /// Background maintenance interval in milliseconds
    pub cleanup_interval_ms: u64,
    /// Idle time after which an inactive instance is collectable
    pub inactive_threshold_ms: u64,
    /// Pressure threshold in bytes; `None` falls back to `max_memory_usage`
    pub memory_pressure_threshold_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_id: Uuid::new_v4().to_string(),
            max_size_bytes: 64 * 1024 * 1024,
            max_entries: 1024,
            ttl_ms: 30 * 60 * 1000,
            eviction_policy: EvictionPolicyType::Lru,
            persist_to_durable_store: false,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_instances: 64,
            max_memory_usage: 256 * 1024 * 1024,
            cleanup_interval_ms: 60_000,
            inactive_threshold_ms: 5 * 60 * 1000,
            memory_pressure_threshold_bytes: None,
        }
    }
}

impl CacheConfig {
    /// Return a copy with every out-of-range field clamped to its default.
    ///
    /// Each clamp is logged once at warn level; a bad value never fails
    /// construction.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.cache_id.is_empty() {
            log::warn!("cache_id is empty, generating a fresh id");
            self.cache_id = Uuid::new_v4().to_string();
        }
        if self.max_size_bytes == 0 {
            warn_clamped(
                "max_size_bytes",
                0,
                format!("must be positive, clamping to {}", defaults.max_size_bytes),
            );
            self.max_size_bytes = defaults.max_size_bytes;
        }
        if self.max_entries == 0 {
            warn_clamped(
                "max_entries",
                0,
                format!("must be positive, clamping to {}", defaults.max_entries),
            );
            self.max_entries = defaults.max_entries;
        }
        if self.ttl_ms == 0 {
            warn_clamped(
                "ttl_ms",
                0,
                format!("must be positive, clamping to {}", defaults.ttl_ms),
            );
            self.ttl_ms = defaults.ttl_ms;
        }
        self
    }

    /// Entry time-to-live as a [`Duration`]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl LifecycleConfig {
    /// Minimum accepted memory budget; anything below falls back to the default.
    const MIN_MEMORY_USAGE: u64 = 1024 * 1024;

    /// Return a copy with every out-of-range field clamped to its default.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.max_instances == 0 {
            warn_clamped(
                "max_instances",
                0,
                format!("must be positive, clamping to {}", defaults.max_instances),
            );
            self.max_instances = defaults.max_instances;
        }
        if self.max_memory_usage < Self::MIN_MEMORY_USAGE {
            warn_clamped(
                "max_memory_usage",
                self.max_memory_usage,
                format!(
                    "below the {} byte floor, clamping to {}",
                    Self::MIN_MEMORY_USAGE,
                    defaults.max_memory_usage
                ),
            );
            self.max_memory_usage = defaults.max_memory_usage;
        }
        if self.cleanup_interval_ms == 0 {
            warn_clamped(
                "cleanup_interval_ms",
                0,
                format!("must be positive, clamping to {}", defaults.cleanup_interval_ms),
            );
            self.cleanup_interval_ms = defaults.cleanup_interval_ms;
        }
        if self.inactive_threshold_ms == 0 {
            warn_clamped(
                "inactive_threshold_ms",
                0,
                format!("must be positive, clamping to {}", defaults.inactive_threshold_ms),
            );
            self.inactive_threshold_ms = defaults.inactive_threshold_ms;
        }
        if self.memory_pressure_threshold_bytes == Some(0) {
            warn_clamped(
                "memory_pressure_threshold_bytes",
                0,
                "must be positive, falling back to max_memory_usage",
            );
            self.memory_pressure_threshold_bytes = None;
        }
        self
    }

    /// Effective pressure threshold in bytes
    pub fn pressure_threshold(&self) -> u64 {
        self.memory_pressure_threshold_bytes
            .unwrap_or(self.max_memory_usage)
    }

    /// Idle threshold as a [`Duration`]
    pub fn inactive_threshold(&self) -> Duration {
        Duration::from_millis(self.inactive_threshold_ms)
    }

    /// Maintenance interval as a [`Duration`]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Sanitize a cache id for filesystem use
pub fn sanitize_cache_id(cache_id: &str) -> String {
    let sanitized = cache_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string();

    if sanitized.is_empty() {
        "cache".to_string()
    } else {
        sanitized
    }
}

/// Platform-appropriate default durable storage directory for a cache id
pub fn default_storage_path(cache_id: &str) -> PathBuf {
    let sanitized_id = sanitize_cache_id(cache_id);

    let base_path = if cfg!(target_os = "linux") {
        std::env::var("XDG_CACHE_HOME").unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(|home| Path::new(&home).join(".cache").to_string_lossy().to_string())
                .unwrap_or_else(|_| ".".to_string())
        })
    } else if cfg!(target_os = "macos") {
        std::env::var("XDG_CACHE_HOME").unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(|home| {
                    Path::new(&home)
                        .join("Library")
                        .join("Caches")
                        .to_string_lossy()
                        .to_string()
                })
                .unwrap_or_else(|_| ".".to_string())
        })
    } else if cfg!(target_os = "windows") {
        std::env::var("LOCALAPPDATA").unwrap_or_else(|_| ".".to_string())
    } else {
        ".".to_string()
    };

    Path::new(&base_path).join("tourcache").join(sanitized_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_cache_config_clamps_to_defaults() {
        let config = CacheConfig {
            max_size_bytes: 0,
            max_entries: 0,
            ttl_ms: 0,
            ..CacheConfig::default()
        }
        .validated();

        let defaults = CacheConfig::default();
        assert_eq!(config.max_size_bytes, defaults.max_size_bytes);
        assert_eq!(config.max_entries, defaults.max_entries);
        assert_eq!(config.ttl_ms, defaults.ttl_ms);
    }

    #[test]
    fn test_lifecycle_config_clamps_memory_floor() {
        let config = LifecycleConfig {
            max_memory_usage: 512,
            memory_pressure_threshold_bytes: Some(0),
            ..LifecycleConfig::default()
        }
        .validated();

        assert_eq!(
            config.max_memory_usage,
            LifecycleConfig::default().max_memory_usage
        );
        assert_eq!(config.memory_pressure_threshold_bytes, None);
        assert_eq!(config.pressure_threshold(), config.max_memory_usage);
    }

    #[test]
    fn test_sanitize_cache_id_replaces_separators() {
        assert_eq!(sanitize_cache_id("ten/ant:one"), "ten_ant_one");
        assert_eq!(sanitize_cache_id(""), "cache");
    }

    #[test]
    fn test_valid_config_passes_through_unchanged() {
        let config = CacheConfig {
            cache_id: "tours".to_string(),
            max_size_bytes: 1024,
            max_entries: 8,
            ttl_ms: 50,
            eviction_policy: EvictionPolicyType::Lfu,
            persist_to_durable_store: true,
        };
        let validated = config.clone().validated();
        assert_eq!(validated.max_size_bytes, 1024);
        assert_eq!(validated.max_entries, 8);
        assert_eq!(validated.ttl_ms, 50);
        assert_eq!(validated.eviction_policy, EvictionPolicyType::Lfu);
    }
}
