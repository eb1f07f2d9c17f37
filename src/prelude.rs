//! Convenience re-exports for common tourcache usage

pub use crate::cache::config::{CacheConfig, EvictionPolicyType, LifecycleConfig};
pub use crate::cache::durable::{DurableStore, FileStore, MemoryStore};
pub use crate::cache::entry::Priority;
pub use crate::cache::error::{CacheError, DurableStoreError};
pub use crate::lifecycle::{MemoryStats, PressureCleanup, PressureLevel, TourLifecycleManager};
pub use crate::telemetry::CacheStatsSnapshot;
pub use crate::tourcache::{TourCache, TourCacheBuilder};
