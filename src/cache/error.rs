//! Error types for the cache and lifecycle subsystem
//!
//! There is no fatal error surface here. Durable store failures degrade to a
//! miss on read and a no-op on write, release callback failures are contained
//! at unregister time, and invalid configuration is clamped. The typed errors
//! below exist so internal operations stay testable; the coordinator is the
//! single boundary that logs and converts them.

/// Errors surfaced by durable store backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableStoreError {
    /// Underlying I/O failed
    Io(String),
    /// Value bytes could not be encoded or decoded
    Serialization(String),
    /// The write service has already shut down
    Closed,
}

impl std::fmt::Display for DurableStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurableStoreError::Io(msg) => write!(f, "durable store I/O error: {}", msg),
            DurableStoreError::Serialization(msg) => {
                write!(f, "durable store serialization error: {}", msg)
            }
            DurableStoreError::Closed => write!(f, "durable store write service is closed"),
        }
    }
}

impl std::error::Error for DurableStoreError {}

impl From<std::io::Error> for DurableStoreError {
    fn from(err: std::io::Error) -> Self {
        DurableStoreError::Io(err.to_string())
    }
}

/// Failure kinds observable through the public surface
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Size estimation fell back to the default estimate
    SizeEstimation(String),
    /// A durable store operation failed and was degraded
    DurableStore(DurableStoreError),
    /// A release callback panicked during unregister
    ReleaseCallback(String),
    /// A configuration field was clamped to its default
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::SizeEstimation(msg) => write!(f, "size estimation failed: {}", msg),
            CacheError::DurableStore(err) => write!(f, "{}", err),
            CacheError::ReleaseCallback(id) => {
                write!(f, "release callback for instance '{}' failed", id)
            }
            CacheError::InvalidConfigValue {
                field,
                value,
                reason,
            } => write!(
                f,
                "invalid value '{}' for field '{}': {}",
                value, field, reason
            ),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<DurableStoreError> for CacheError {
    fn from(err: DurableStoreError) -> Self {
        CacheError::DurableStore(err)
    }
}
