//! Tiered definition cache implementation
//!
//! The coordinator owns the hot tier behind one exclusive lock per cache
//! instance; the persistent tier and the durable store adapter sit behind it
//! in the read fallback chain.

pub mod config;
pub mod coordinator;
pub mod durable;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod optimizer;
pub mod size;
pub mod tier;
pub mod worker;
