//! Serialized size estimation for definitions and instance payloads
//!
//! Estimates are the bincode-encoded length of the value. Estimation never
//! fails: an unencodable value falls back to a fixed default so accounting can
//! proceed, with the failure logged.

use serde::Serialize;

use super::error::{CacheError, DurableStoreError};

/// Fallback estimate used when a value cannot be encoded
pub const DEFAULT_SIZE_ESTIMATE: u64 = 1024;

/// Estimated serialized size of a value in bytes
pub fn estimate<T: Serialize>(value: &T) -> u64 {
    match bincode::serde::encode_to_vec(value, bincode::config::standard()) {
        Ok(bytes) => bytes.len() as u64,
        Err(err) => {
            log::warn!(
                "{}, using default of {} bytes",
                CacheError::SizeEstimation(err.to_string()),
                DEFAULT_SIZE_ESTIMATE
            );
            DEFAULT_SIZE_ESTIMATE
        }
    }
}

/// Encode a value for durable storage
pub fn try_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, DurableStoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|err| DurableStoreError::Serialization(err.to_string()))
}

/// Decode a value read back from durable storage
pub fn try_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, DurableStoreError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|err| DurableStoreError::Serialization(err.to_string()))
}
