//! Shared-cache capability trait.
//!
//! This module defines [`MetricCache`], the narrow contract the aggregator
//! needs from a distributed cache: keyed byte values with TTLs, an atomic
//! integer increment, an atomic insert, multi-get, and compare-and-swap.
//! Implementations bind it to a concrete provider (memcached, Redis, the
//! in-memory fake in [`memory`](crate::memory)); the core never sees
//! anything past this trait.
//!
//! # Semantics backends must honour
//!
//! - A missing or expired key reads as `Ok(None)`, never an error.
//! - [`increment`](MetricCache::increment) is atomic across processes and
//!   interprets the stored value as decimal ASCII of an unsigned 64-bit
//!   integer.
//! - [`add`](MetricCache::add) stores only if the key is absent, atomically.
//! - [`compare_and_swap`](MetricCache::compare_and_swap) replaces the value
//!   only if the current bytes equal the bytes the caller read.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StatResult;

/// One cache entry: key, opaque value bytes, and an optional TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    /// Cache key.
    pub key: String,
    /// Opaque value bytes.
    pub value: Bytes,
    /// Relative expiry; `None` means the entry does not expire.
    pub ttl: Option<Duration>,
}

impl CacheItem {
    /// Creates an item without a TTL.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self { key: key.into(), value: value.into(), ttl: None }
    }

    /// Sets the item's TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Capability contract over the shared distributed cache.
///
/// Implementations must be thread-safe; recorder instances in many
/// processes hammer the same keys concurrently and rely on the atomicity
/// noted on each method.
#[async_trait]
pub trait MetricCache: Send + Sync {
    /// Retrieves an item by key. A missing or expired key is `Ok(None)`.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StatResult<Option<CacheItem>>;

    /// Stores an item unconditionally (last write wins).
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn set(&self, item: CacheItem) -> StatResult<()>;

    /// Stores an item only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StatError::NotStored`](crate::StatError::NotStored) when
    /// the key already holds a live item.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn add(&self, item: CacheItem) -> StatResult<()>;

    /// Atomically adds `delta` to the integer stored at `key`, returning
    /// the new value.
    ///
    /// An absent key is first initialised to `initial`. A negative delta
    /// floors at zero rather than wrapping.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn increment(&self, key: &str, delta: i64, initial: u64) -> StatResult<u64>;

    /// Retrieves many keys in one round trip. Missing keys are simply
    /// absent from the result map.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn get_multi(&self, keys: &[String]) -> StatResult<HashMap<String, CacheItem>>;

    /// Deletes many keys. Missing keys are not an error.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn delete_multi(&self, keys: &[String]) -> StatResult<()>;

    /// Replaces the value at `item.key` only if its current bytes equal
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StatError::Conflict`](crate::StatError::Conflict) when the
    /// current value differs or the item vanished since the caller read it.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn compare_and_swap(&self, expected: &[u8], item: CacheItem) -> StatResult<()>;
}
