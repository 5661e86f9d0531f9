//! Public recording entry points.
//!
//! [`Recorder`] is what application code holds: increment a counter,
//! record a gauge, record a timing. Each call resolves the metric's
//! config through the registry, derives the current period's bucket key,
//! and writes to the shared cache. Recorders are cheap to construct and
//! safe to share; many handler instances across many processes write the
//! same buckets concurrently.
//!
//! # Write semantics per kind
//!
//! - **Counters** use the cache's atomic increment and are exact under
//!   any number of parallel writers.
//! - **Gauges** replace the bucket with a one-element list; the last
//!   write within a period wins, which is the point of a gauge.
//! - **Timings** append to the bucket through a compare-and-swap loop
//!   with jitter, degrading to a last-write-wins overwrite only when the
//!   retry budget is exhausted under sustained contention.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tracing::{debug, warn};

use crate::{
    cache::{CacheItem, MetricCache},
    codec,
    error::{ConfigError, StatError, StatResult},
    period::BUCKET_TTL,
    registry::ConfigRegistry,
    store::ConfigStore,
    types::MetricKind,
};

/// Default number of compare-and-swap attempts for a timing write.
const DEFAULT_CAS_ATTEMPTS: u32 = 5;

/// Default jitter bounds between CAS attempts.
const DEFAULT_JITTER_MIN: Duration = Duration::from_micros(50);
const DEFAULT_JITTER_MAX: Duration = Duration::from_micros(500);

/// Tuning for the timing write path's CAS loop.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use statstash::CasRetryConfig;
///
/// let config = CasRetryConfig::builder()
///     .max_attempts(3)
///     .jitter(Duration::from_micros(100), Duration::from_micros(200))
///     .build()
///     .expect("valid config");
/// ```
#[derive(Debug, Clone)]
pub struct CasRetryConfig {
    max_attempts: u32,
    jitter_min: Duration,
    jitter_max: Duration,
}

impl CasRetryConfig {
    /// Starts building a config; defaults are 5 attempts with 50–500µs
    /// jitter.
    #[must_use]
    pub fn builder() -> CasRetryConfigBuilder {
        CasRetryConfigBuilder {
            max_attempts: DEFAULT_CAS_ATTEMPTS,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }

    /// Maximum CAS attempts before degrading to a plain overwrite.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn jitter(&self) -> Duration {
        let (lo, hi) = (self.jitter_min.as_micros() as u64, self.jitter_max.as_micros() as u64);
        Duration::from_micros(rand::rng().random_range(lo..=hi))
    }
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CAS_ATTEMPTS,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }
}

/// Builder for [`CasRetryConfig`].
pub struct CasRetryConfigBuilder {
    max_attempts: u32,
    jitter_min: Duration,
    jitter_max: Duration,
}

impl CasRetryConfigBuilder {
    /// Sets the maximum number of CAS attempts.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the jitter bounds applied between attempts.
    #[must_use]
    pub fn jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Builds the config, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_attempts` is 0 or the jitter bounds
    /// are inverted.
    pub fn build(self) -> Result<CasRetryConfig, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::MustBePositive {
                field: "max_attempts",
                value: self.max_attempts.to_string(),
            });
        }
        if self.jitter_min > self.jitter_max {
            return Err(ConfigError::InvalidRelation {
                field_a: "jitter_min",
                value_a: format!("{}us", self.jitter_min.as_micros()),
                field_b: "jitter_max",
                value_b: format!("{}us", self.jitter_max.as_micros()),
            });
        }
        Ok(CasRetryConfig {
            max_attempts: self.max_attempts,
            jitter_min: self.jitter_min,
            jitter_max: self.jitter_max,
        })
    }
}

/// Records samples into the current aggregation period's buckets.
pub struct Recorder {
    cache: Arc<dyn MetricCache>,
    registry: ConfigRegistry,
    cas: CasRetryConfig,
    // Owned sampling RNG; each recorder instance gets an independent seed.
    rng: Mutex<SmallRng>,
}

impl Recorder {
    /// Creates a recorder over the given cache and store, seeding its
    /// sampling RNG from the thread RNG.
    #[must_use]
    pub fn new(cache: Arc<dyn MetricCache>, store: Arc<dyn ConfigStore>) -> Self {
        let registry = ConfigRegistry::new(Arc::clone(&cache), store);
        Self {
            cache,
            registry,
            cas: CasRetryConfig::default(),
            rng: Mutex::new(SmallRng::from_rng(&mut rand::rng())),
        }
    }

    /// Replaces the timing write path's CAS tuning.
    #[must_use]
    pub fn with_cas_config(mut self, cas: CasRetryConfig) -> Self {
        self.cas = cas;
        self
    }

    /// Replaces the sampling RNG with a deterministically seeded one.
    /// Intended for tests that assert on sampling behaviour.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(SmallRng::seed_from_u64(seed));
        self
    }

    /// The registry this recorder resolves configs through.
    #[must_use]
    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Adds one to a counter.
    ///
    /// # Errors
    ///
    /// Propagates config-lookup and cache failures.
    pub async fn increment_counter(&self, name: &str, source: &str) -> StatResult<()> {
        self.increment_counter_by(name, source, 1).await
    }

    /// Adds `delta` to a counter.
    ///
    /// # Errors
    ///
    /// Propagates config-lookup and cache failures; increment failures
    /// are logged before surfacing.
    pub async fn increment_counter_by(
        &self,
        name: &str,
        source: &str,
        delta: i64,
    ) -> StatResult<()> {
        debug!(name, source, delta, "incrementing counter");
        let cfg = self.registry.get_config(MetricKind::Counter, name, source).await?;
        let key = cfg.bucket_key(Utc::now(), 0);
        if let Err(err) = self.cache.increment(&key, delta, 0).await {
            warn!(key = %key, delta, error = %err, "failed to increment counter bucket");
            return Err(err);
        }
        Ok(())
    }

    /// Records a gauge sample. The bucket ends the period holding the
    /// most recent value.
    ///
    /// # Errors
    ///
    /// Returns [`StatError::Dropped`] (carrying the sample) when the
    /// write path fails.
    pub async fn record_gauge(&self, name: &str, source: &str, value: f64) -> StatResult<()> {
        self.record_sample(MetricKind::Gauge, name, source, value, 1.0).await
    }

    /// Records a timing sample, subject to `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`StatError::NotSampled`] when the sample was skipped by
    /// rate — callers that do not care may ignore it — and
    /// [`StatError::Dropped`] when the write path fails.
    pub async fn record_timing(
        &self,
        name: &str,
        source: &str,
        value: f64,
        sample_rate: f64,
    ) -> StatResult<()> {
        self.record_sample(MetricKind::Timing, name, source, value, sample_rate).await
    }

    /// Current-period counter value, or 0 if no bucket exists yet.
    /// Diagnostic helper; the flusher is the real consumer of buckets.
    pub async fn peek_counter(&self, name: &str, source: &str) -> StatResult<u64> {
        let cfg = self.registry.get_config(MetricKind::Counter, name, source).await?;
        let key = cfg.bucket_key(Utc::now(), 0);
        match self.cache.get(&key).await? {
            Some(item) => std::str::from_utf8(&item.value)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or_else(|| StatError::corrupt(key, "counter bucket is not decimal ASCII")),
            None => Ok(0),
        }
    }

    /// Current-period gauge bucket contents. Diagnostic helper.
    pub async fn peek_gauge(&self, name: &str, source: &str) -> StatResult<Vec<f64>> {
        self.peek_samples(MetricKind::Gauge, name, source).await
    }

    /// Current-period timing bucket contents, in arrival order.
    /// Diagnostic helper.
    pub async fn peek_timing(&self, name: &str, source: &str) -> StatResult<Vec<f64>> {
        self.peek_samples(MetricKind::Timing, name, source).await
    }

    async fn peek_samples(
        &self,
        kind: MetricKind,
        name: &str,
        source: &str,
    ) -> StatResult<Vec<f64>> {
        let cfg = self.registry.get_config(kind, name, source).await?;
        let key = cfg.bucket_key(Utc::now(), 0);
        match self.cache.get(&key).await? {
            Some(item) => codec::decode(&item.value),
            None => Ok(Vec::new()),
        }
    }

    async fn record_sample(
        &self,
        kind: MetricKind,
        name: &str,
        source: &str,
        value: f64,
        sample_rate: f64,
    ) -> StatResult<()> {
        // Sampling is decided before any I/O, so skipped samples cost one
        // RNG draw and nothing else.
        if sample_rate < 1.0 && self.rng.lock().random::<f64>() > sample_rate {
            return Err(StatError::NotSampled);
        }

        debug!(kind = %kind, name, source, value, sample_rate, "recording sample");
        let now = Utc::now();

        let cfg = match self.registry.get_config(kind, name, source).await {
            Ok(cfg) => cfg,
            Err(err) => {
                let wrapped = StatError::dropped(kind, name, source, now, value, err);
                warn!(error = %wrapped, "dropping sample: config lookup failed");
                return Err(wrapped);
            }
        };

        let key = cfg.bucket_key(now, 0);
        let written = match kind {
            MetricKind::Gauge => self.write_gauge(&key, value).await,
            MetricKind::Timing => self.write_timing(&key, value).await,
            MetricKind::Counter => {
                Err(StatError::internal("counters accumulate via increment, not samples"))
            }
        };

        written.map_err(|err| {
            let wrapped = StatError::dropped(kind, name, source, now, value, err);
            warn!(error = %wrapped, "dropping sample: bucket write failed");
            wrapped
        })
    }

    async fn write_gauge(&self, key: &str, value: f64) -> StatResult<()> {
        // Probe read: an unreachable cache must fail the call before we
        // overwrite anything.
        let _ = self.cache.get(key).await?;
        let bytes = codec::encode(&vec![value])?;
        self.cache.set(CacheItem::new(key, bytes).with_ttl(BUCKET_TTL)).await
    }

    async fn write_timing(&self, key: &str, value: f64) -> StatResult<()> {
        for attempt in 0..self.cas.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.cas.jitter()).await;
            }

            match self.cache.get(key).await? {
                None => {
                    let bytes = codec::encode(&vec![value])?;
                    match self.cache.add(CacheItem::new(key, bytes).with_ttl(BUCKET_TTL)).await {
                        Ok(()) => return Ok(()),
                        // A racer created the bucket between read and add.
                        Err(StatError::NotStored) => continue,
                        Err(err) => return Err(err),
                    }
                }
                Some(item) => {
                    let mut samples: Vec<f64> = codec::decode(&item.value)?;
                    samples.push(value);
                    let bytes = codec::encode(&samples)?;
                    let replacement = CacheItem::new(key, bytes).with_ttl(BUCKET_TTL);
                    match self.cache.compare_and_swap(&item.value, replacement).await {
                        Ok(()) => return Ok(()),
                        Err(StatError::Conflict) => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        // Sustained contention exhausted the CAS budget; degrade to a
        // last-write-wins overwrite so the sample is not lost outright.
        debug!(key, attempts = self.cas.max_attempts, "cas budget exhausted, overwriting");
        let mut samples: Vec<f64> = match self.cache.get(key).await? {
            Some(item) => codec::decode(&item.value)?,
            None => Vec::new(),
        };
        samples.push(value);
        let bytes = codec::encode(&samples)?;
        self.cache.set(CacheItem::new(key, bytes).with_ttl(BUCKET_TTL)).await
    }
}
