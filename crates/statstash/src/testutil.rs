//! Shared test utilities: failure injection and batch capture.
//!
//! Feature-gated behind `testutil` so nothing here leaks into production
//! builds. Integration tests enable it via `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! statstash = { path = "../statstash", features = ["testutil"] }
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    cache::{CacheItem, MetricCache},
    error::{StatError, StatResult},
    sink::{Sink, SinkConfig},
    store::ConfigStore,
    types::{StatConfig, StatSummary},
};

/// Identifies a [`MetricCache`] method for targeted failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    /// [`MetricCache::get`]
    Get,
    /// [`MetricCache::set`]
    Set,
    /// [`MetricCache::add`]
    Add,
    /// [`MetricCache::increment`]
    Increment,
    /// [`MetricCache::get_multi`]
    GetMulti,
    /// [`MetricCache::delete_multi`]
    DeleteMulti,
    /// [`MetricCache::compare_and_swap`]
    CompareAndSwap,
}

/// Factory that produces a [`StatError`] on each invocation.
pub type ErrorFactory = Arc<dyn Fn() -> StatError + Send + Sync>;

/// Returns a factory that produces [`StatError::Connection`] errors.
#[must_use]
pub fn error_factory_connection(detail: &str) -> ErrorFactory {
    let detail = detail.to_owned();
    Arc::new(move || StatError::connection(&detail))
}

/// Returns a factory that produces [`StatError::Internal`] errors.
#[must_use]
pub fn error_factory_internal(detail: &str) -> ErrorFactory {
    let detail = detail.to_owned();
    Arc::new(move || StatError::internal(detail.clone()))
}

/// Configures when and how a failing wrapper injects errors.
///
/// With no targeted operations, every operation fails; `fail_after`
/// lets that many targeted operations succeed first.
pub struct FailureConfig {
    error_factory: ErrorFactory,
    operations: Vec<CacheOp>,
    fail_after: usize,
}

impl FailureConfig {
    /// Config that fails all operations immediately with the given
    /// factory's error.
    #[must_use]
    pub fn new(error_factory: ErrorFactory) -> Self {
        Self { error_factory, operations: Vec::new(), fail_after: 0 }
    }

    /// Restricts failures to the listed operations; others delegate to
    /// the inner cache untouched.
    #[must_use]
    pub fn with_operations(mut self, operations: Vec<CacheOp>) -> Self {
        self.operations = operations;
        self
    }

    /// Allows `n` targeted operations to succeed before failures begin.
    #[must_use]
    pub fn with_fail_after(mut self, n: usize) -> Self {
        self.fail_after = n;
        self
    }
}

/// [`MetricCache`] wrapper that injects configurable failures.
///
/// Untargeted operations delegate to the inner cache, so combining this
/// with [`MemoryCache`](crate::MemoryCache) gives self-contained
/// failure-injection tests. The counter is shared across clones.
pub struct FailingCache<C> {
    inner: C,
    error_factory: ErrorFactory,
    operations: Vec<CacheOp>,
    counter: Arc<AtomicUsize>,
    fail_after: usize,
}

impl<C: Clone> Clone for FailingCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            error_factory: Arc::clone(&self.error_factory),
            operations: self.operations.clone(),
            counter: Arc::clone(&self.counter),
            fail_after: self.fail_after,
        }
    }
}

impl<C> FailingCache<C> {
    /// Wraps `inner` with the given failure configuration.
    pub fn wrap(inner: C, config: FailureConfig) -> Self {
        Self {
            inner,
            error_factory: config.error_factory,
            operations: config.operations,
            counter: Arc::new(AtomicUsize::new(0)),
            fail_after: config.fail_after,
        }
    }

    fn check_failure(&self, op: CacheOp) -> StatResult<()> {
        if !self.operations.is_empty() && !self.operations.contains(&op) {
            return Ok(());
        }
        let prev = self.counter.fetch_add(1, Ordering::Relaxed);
        if prev >= self.fail_after { Err((self.error_factory)()) } else { Ok(()) }
    }
}

#[async_trait]
impl<C: MetricCache> MetricCache for FailingCache<C> {
    async fn get(&self, key: &str) -> StatResult<Option<CacheItem>> {
        self.check_failure(CacheOp::Get)?;
        self.inner.get(key).await
    }

    async fn set(&self, item: CacheItem) -> StatResult<()> {
        self.check_failure(CacheOp::Set)?;
        self.inner.set(item).await
    }

    async fn add(&self, item: CacheItem) -> StatResult<()> {
        self.check_failure(CacheOp::Add)?;
        self.inner.add(item).await
    }

    async fn increment(&self, key: &str, delta: i64, initial: u64) -> StatResult<u64> {
        self.check_failure(CacheOp::Increment)?;
        self.inner.increment(key, delta, initial).await
    }

    async fn get_multi(&self, keys: &[String]) -> StatResult<HashMap<String, CacheItem>> {
        self.check_failure(CacheOp::GetMulti)?;
        self.inner.get_multi(keys).await
    }

    async fn delete_multi(&self, keys: &[String]) -> StatResult<()> {
        self.check_failure(CacheOp::DeleteMulti)?;
        self.inner.delete_multi(keys).await
    }

    async fn compare_and_swap(&self, expected: &[u8], item: CacheItem) -> StatResult<()> {
        self.check_failure(CacheOp::CompareAndSwap)?;
        self.inner.compare_and_swap(expected, item).await
    }
}

/// [`ConfigStore`] wrapper that can fail reads, writes, or scans on
/// demand, and can truncate a scan mid-stream with an injected error.
pub struct FailingStore<S> {
    inner: S,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
    scan_error: Mutex<Option<String>>,
}

impl<S> FailingStore<S> {
    /// Wraps `inner` with all failures disabled.
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            fail_get: AtomicBool::new(false),
            fail_put: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            scan_error: Mutex::new(None),
        }
    }

    /// Makes subsequent `get` calls fail.
    pub fn fail_get(&self, enabled: bool) {
        self.fail_get.store(enabled, Ordering::Relaxed);
    }

    /// Makes subsequent `put` calls fail.
    pub fn fail_put(&self, enabled: bool) {
        self.fail_put.store(enabled, Ordering::Relaxed);
    }

    /// Makes subsequent `delete_multi` calls fail.
    pub fn fail_delete(&self, enabled: bool) {
        self.fail_delete.store(enabled, Ordering::Relaxed);
    }

    /// Makes subsequent scans end with an injected error element after
    /// whatever real records the inner store produced.
    pub fn fail_scan(&self, detail: Option<&str>) {
        *self.scan_error.lock() = detail.map(str::to_owned);
    }
}

#[async_trait]
impl<S: ConfigStore> ConfigStore for FailingStore<S> {
    async fn get(&self, key: &str) -> StatResult<Option<StatConfig>> {
        if self.fail_get.load(Ordering::Relaxed) {
            return Err(StatError::connection("injected store get failure"));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, config: &StatConfig) -> StatResult<()> {
        if self.fail_put.load(Ordering::Relaxed) {
            return Err(StatError::connection("injected store put failure"));
        }
        self.inner.put(key, config).await
    }

    async fn delete_multi(&self, keys: &[String]) -> StatResult<()> {
        if self.fail_delete.load(Ordering::Relaxed) {
            return Err(StatError::connection("injected store delete failure"));
        }
        self.inner.delete_multi(keys).await
    }

    async fn active_since(&self, cutoff: DateTime<Utc>) -> Vec<StatResult<StatConfig>> {
        let mut results = self.inner.active_since(cutoff).await;
        if let Some(detail) = self.scan_error.lock().clone() {
            results.push(Err(StatError::connection(detail)));
        }
        results
    }

    async fn all(&self) -> StatResult<Vec<StatConfig>> {
        self.inner.all().await
    }
}

/// Sink that records every batch it receives and can be told to fail.
#[derive(Default)]
pub struct CapturingSink {
    batches: Mutex<Vec<Vec<StatSummary>>>,
    fail: AtomicBool,
}

impl CapturingSink {
    /// Creates an empty capturing sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent flushes fail without recording.
    pub fn set_fail(&self, enabled: bool) {
        self.fail.store(enabled, Ordering::Relaxed);
    }

    /// Number of successful flush calls so far.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// All captured batches, in arrival order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<StatSummary>> {
        self.batches.lock().clone()
    }

    /// Every record of every captured batch, flattened.
    #[must_use]
    pub fn records(&self) -> Vec<StatSummary> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl Sink for CapturingSink {
    async fn flush(&self, batch: &[StatSummary], _cfg: &SinkConfig) -> StatResult<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(StatError::connection("injected sink failure"));
        }
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}
