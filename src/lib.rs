//! Tourcache - Multi-tier definition cache with instance lifecycle management
//!
//! A tiered cache for onboarding tour definitions and a parallel lifecycle
//! manager for the runtime instances built from them.
//!
//! # Features
//!
//! - **Multi-tier architecture**: in-process hot tier, promoted persistent tier,
//!   pluggable durable cold store
//! - **Pluggable eviction**: LRU, LFU, TTL-oldest and priority-aware policies
//!   with adaptive switching from observed hit rates
//! - **Self-tuning**: periodic optimizer pass that promotes, demotes and grows
//!   the byte budget from collected statistics
//! - **Instance lifecycle**: registered runtime instances with bounded total
//!   memory and pressure-triggered cleanup
//! - **No fatal errors**: every internal failure degrades to a miss or a no-op,
//!   so callers can always fall back to the authoritative object source

// Public API modules
pub mod prelude;
pub mod tourcache;

// Cache implementation modules - the durable store trait is public for user backends
pub mod cache;
pub mod lifecycle;
pub mod telemetry;

// Re-export the public API at the crate root for convenience
pub use prelude::*;
pub use tourcache::{TourCache, TourCacheBuilder};
