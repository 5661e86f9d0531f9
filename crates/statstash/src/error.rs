//! Error types and result alias.
//!
//! This module defines the canonical error set for the aggregation
//! pipeline. Cache and store implementations must map their internal
//! errors to these variants so that the recorder and flusher can apply a
//! uniform propagation policy.
//!
//! # Error Types
//!
//! - [`StatError::FlushTooSoon`] - Non-forced flush refused by the last-flushed gate
//! - [`StatError::NotSampled`] - Timing sample skipped by its sample rate (not a failure)
//! - [`StatError::Dropped`] - A sample could not be stored; carries the sample for diagnostics
//! - [`StatError::Corrupt`] - Bucket bytes failed to decode during a flush
//! - [`StatError::Conflict`] - Compare-and-swap lost against a concurrent writer
//! - [`StatError::NotStored`] - Atomic add refused because the key already exists
//! - [`StatError::Connection`] - Network or connection-related failures
//! - [`StatError::Serialization`] - Data encoding/decoding failures
//! - [`StatError::Internal`] - Backend-specific internal errors
//! - [`ConfigError`] - Configuration value failed validation at construction time
//!
//! # Example
//!
//! ```
//! use statstash::{StatError, StatResult};
//!
//! fn lookup(key: &str) -> StatResult<Vec<u8>> {
//!     Err(StatError::internal(format!("no such key: {key}")))
//! }
//! ```

use chrono::{DateTime, Utc};

use crate::types::MetricKind;

/// Result type alias for aggregation operations.
pub type StatResult<T> = Result<T, StatError>;

/// Errors that can occur while recording, flushing, or talking to the
/// cache and durable store.
///
/// Two variants are sentinels rather than failures: [`StatError::NotSampled`]
/// tells the caller a timing sample was deliberately skipped, and
/// [`StatError::FlushTooSoon`] tells a tick handler that the period it asked
/// for was already covered.
#[derive(Debug, thiserror::Error)]
pub enum StatError {
    /// Non-forced flush refused because the last-flushed marker is within
    /// one aggregation period of the requested period start.
    #[error("too soon to flush: last flushed period is within one aggregation period")]
    FlushTooSoon,

    /// A timing sample was skipped because the uniform draw exceeded the
    /// sample rate. Callers that do not care may ignore this.
    #[error("sample skipped by sampling rate")]
    NotSampled,

    /// A recording call could not be stored. Carries the original sample
    /// so the application can log or re-submit it.
    #[error("stat not stored [{kind}/{name}/{source}, at: {at}, value: {value}]: {cause}")]
    Dropped {
        /// Metric kind of the dropped sample.
        kind: MetricKind,
        /// Metric name of the dropped sample.
        name: String,
        /// Metric source of the dropped sample.
        source: String,
        /// Wall-clock time at which the sample was taken.
        at: DateTime<Utc>,
        /// The sample value that was lost.
        value: f64,
        /// The underlying failure.
        #[source]
        cause: Box<StatError>,
    },

    /// A bucket's bytes failed to decode. The flusher skips the bucket and
    /// logs; this never reaches a sink.
    #[error("corrupt bucket data at {key}: {detail}")]
    Corrupt {
        /// Cache key of the offending bucket.
        key: String,
        /// Decoder diagnostic.
        detail: String,
    },

    /// Compare-and-swap observed a concurrent modification (or the item
    /// vanished between read and write).
    #[error("compare-and-swap conflict")]
    Conflict,

    /// Atomic add refused because the key already holds a live item.
    #[error("item not stored: key already present")]
    NotStored,

    /// Connection or network error against the cache, store, or sink.
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all for backend-specific errors that fit no other category.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StatError {
    /// Creates a `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Creates an `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a `Corrupt` error for the given bucket key.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Corrupt { key: key.into(), detail: detail.into() }
    }

    /// Wraps a failed sample in a `Dropped` error carrying the sample.
    #[must_use]
    pub fn dropped(
        kind: MetricKind,
        name: impl Into<String>,
        source: impl Into<String>,
        at: DateTime<Utc>,
        value: f64,
        cause: StatError,
    ) -> Self {
        Self::Dropped {
            kind,
            name: name.into(),
            source: source.into(),
            at,
            value,
            cause: Box::new(cause),
        }
    }

    /// Returns `true` if this is the sampling sentinel.
    #[must_use]
    pub fn is_not_sampled(&self) -> bool {
        matches!(self, Self::NotSampled)
    }

    /// Returns `true` if this is the flush-gate sentinel.
    #[must_use]
    pub fn is_too_soon(&self) -> bool {
        matches!(self, Self::FlushTooSoon)
    }
}

/// Error returned when a configuration value fails validation.
///
/// Each variant names the field that was invalid and the constraint it
/// violated, giving the operator something actionable.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field that must be positive was zero or a zero-length duration.
    #[error("invalid {field}: must be positive (got {value})")]
    MustBePositive {
        /// The name of the configuration field.
        field: &'static str,
        /// A human-readable representation of the invalid value.
        value: String,
    },

    /// A relational constraint between two fields was violated.
    #[error("invalid config: {field_a} ({value_a}) must be <= {field_b} ({value_b})")]
    InvalidRelation {
        /// The field that should be the smaller value.
        field_a: &'static str,
        /// The actual value of field_a (human-readable).
        value_a: String,
        /// The field that should be the larger value.
        field_b: &'static str,
        /// The actual value of field_b (human-readable).
        value_b: String,
    },
}
