//! Byte-level encoding of structured cache values.
//!
//! Gauge and timing buckets, cached configs, and the last-flushed marker
//! are all written and read by this crate, so both sides agree on one
//! encoder. Counter buckets are decimal ASCII and never pass through
//! here; the cache needs to interpret them natively for atomic increment.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{StatError, StatResult};

/// Encodes a value for storage in the cache.
pub(crate) fn encode<T: Serialize>(value: &T) -> StatResult<Vec<u8>> {
    bincode::serialize(value).map_err(|err| StatError::serialization(err.to_string()))
}

/// Decodes a value previously written with [`encode`].
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StatResult<T> {
    bincode::deserialize(bytes).map_err(|err| StatError::serialization(err.to_string()))
}
