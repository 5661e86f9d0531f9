//! Periodic collapse of buckets into summary batches.
//!
//! [`Flusher::update_backend`] is invoked by an external tick (webhook,
//! cron, loop — this crate owns no scheduler). It enumerates the live
//! configs, multi-gets their buckets for the target period, summarises
//! each one, and hands the batch to a [`Sink`]. The `ss-lpf` marker in
//! the shared cache records the most recently flushed period and gates
//! non-forced re-flushes.
//!
//! # What advances `ss-lpf`
//!
//! Only a sink that returned success. Enumeration failures, cache
//! failures, and sink failures all leave the marker untouched, so the
//! same period can be retried on the next tick (or immediately with
//! `force`). Buckets are never deleted by a flush; they lapse via TTL,
//! which also means a forced re-flush inside the TTL window re-emits
//! identical data.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheItem, MetricCache},
    codec,
    error::{StatError, StatResult},
    period::{PERIOD_SECS, period_start},
    registry::ConfigRegistry,
    sink::{Sink, SinkConfig},
    store::ConfigStore,
    types::{
        CounterSummary, GaugeSummary, MetricKind, StatConfig, StatSummary, TimingSummary,
    },
};

/// Cache key of the last-flushed-period marker.
pub const LAST_FLUSHED_KEY: &str = "ss-lpf";

/// Collapses one aggregation period's buckets into a summary batch and
/// forwards it to a sink.
#[derive(Clone)]
pub struct Flusher {
    cache: Arc<dyn MetricCache>,
    registry: ConfigRegistry,
}

impl Flusher {
    /// Creates a flusher over the given cache and store.
    #[must_use]
    pub fn new(cache: Arc<dyn MetricCache>, store: Arc<dyn ConfigStore>) -> Self {
        let registry = ConfigRegistry::new(Arc::clone(&cache), store);
        Self { cache, registry }
    }

    /// The registry this flusher enumerates configs through.
    #[must_use]
    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Flushes the period starting at `period_start` to `sink`.
    ///
    /// Unless `force` is set, refuses with [`StatError::FlushTooSoon`]
    /// when the last flushed period is within one aggregation period of
    /// the request, making duplicate ticks harmless.
    ///
    /// # Errors
    ///
    /// - [`StatError::FlushTooSoon`] from the gate described above.
    /// - Config-enumeration errors abort the flush.
    /// - Sink errors propagate; `ss-lpf` is not advanced.
    ///
    /// A failed bucket multi-get is logged and yields `Ok(())` without
    /// advancing `ss-lpf`; a later forced flush can retry the period.
    pub async fn update_backend(
        &self,
        period_start: DateTime<Utc>,
        sink: &dyn Sink,
        sink_cfg: &SinkConfig,
        force: bool,
    ) -> StatResult<()> {
        if !force {
            let last_flushed = self.last_period_flushed().await;
            if period_start - last_flushed < TimeDelta::seconds(PERIOD_SECS) {
                warn!(
                    requested = %period_start,
                    last_flushed = %last_flushed,
                    "refusing to update backend: too soon since last flush"
                );
                return Err(StatError::FlushTooSoon);
            }
        }

        let (configs, enumeration_err) = self.registry.active_configs(period_start).await;
        if let Some(err) = enumeration_err {
            error!(error = %err, "failed to enumerate active configs for flush");
            return Err(err);
        }
        if configs.is_empty() {
            debug!(period = %period_start, "no active configs, nothing to flush");
            return Ok(());
        }

        let keys: Vec<String> = configs.keys().cloned().collect();
        let items = match self.cache.get_multi(&keys).await {
            Ok(items) => items,
            Err(err) => {
                error!(error = %err, "failed to fetch buckets for flush");
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(items.len());
        for (key, item) in &items {
            let Some(cfg) = configs.get(key) else {
                continue;
            };
            match summarize(cfg, key, &item.value) {
                Ok(summary) => batch.push(summary),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping undecodable bucket");
                }
            }
        }

        if batch.is_empty() {
            debug!(period = %period_start, "no buckets produced summaries");
            return Ok(());
        }

        if let Err(err) = sink.flush(&batch, sink_cfg).await {
            error!(error = %err, records = batch.len(), "failed to flush batch to sink");
            return Err(err);
        }

        if let Err(err) = self.mark_period_flushed(period_start).await {
            warn!(error = %err, "flushed batch but failed to advance last-flushed marker");
        }
        Ok(())
    }

    /// Convenience for tick handlers: flushes the period before the one
    /// containing `now`, non-forced, logging the outcome either way.
    ///
    /// # Errors
    ///
    /// Propagates [`update_backend`](Self::update_backend) errors,
    /// including the [`StatError::FlushTooSoon`] sentinel on duplicate
    /// ticks.
    pub async fn flush_previous(&self, sink: &dyn Sink, sink_cfg: &SinkConfig) -> StatResult<()> {
        let start = period_start(Utc::now(), -1);
        match self.update_backend(start, sink, sink_cfg, false).await {
            Ok(()) => {
                info!(period = %start, "updated stats backend");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed updating stats backend");
                Err(err)
            }
        }
    }

    /// Reads the last-flushed marker; absence or unreadability counts as
    /// the zero instant, which lets every period through the gate.
    async fn last_period_flushed(&self) -> DateTime<Utc> {
        let epoch = DateTime::UNIX_EPOCH;
        match self.cache.get(LAST_FLUSHED_KEY).await {
            Ok(Some(item)) => codec::decode::<i64>(&item.value)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(epoch),
            Ok(None) => epoch,
            Err(err) => {
                warn!(error = %err, "failed to read last-flushed marker");
                epoch
            }
        }
    }

    async fn mark_period_flushed(&self, period_start: DateTime<Utc>) -> StatResult<()> {
        let bytes = codec::encode(&period_start.timestamp())?;
        self.cache.set(CacheItem::new(LAST_FLUSHED_KEY, bytes)).await
    }
}

/// Builds the summary record for one bucket.
///
/// Counter buckets that are not decimal ASCII summarise as zero rather
/// than erroring; list buckets that fail to decode (or are empty, which a
/// well-formed writer never produces) are reported as corrupt so the
/// flusher can skip them.
fn summarize(cfg: &StatConfig, key: &str, raw: &Bytes) -> StatResult<StatSummary> {
    match cfg.kind {
        MetricKind::Counter => {
            let count = std::str::from_utf8(raw)
                .ok()
                .and_then(|text| text.parse().ok())
                .unwrap_or(0);
            Ok(StatSummary::Counter(CounterSummary { config: cfg.clone(), count }))
        }
        MetricKind::Gauge => {
            let samples: Vec<f64> = codec::decode(raw)
                .map_err(|err| StatError::corrupt(key, err.to_string()))?;
            let value = samples
                .first()
                .copied()
                .ok_or_else(|| StatError::corrupt(key, "empty gauge bucket"))?;
            Ok(StatSummary::Gauge(GaugeSummary { config: cfg.clone(), value }))
        }
        MetricKind::Timing => {
            let samples: Vec<f64> = codec::decode(raw)
                .map_err(|err| StatError::corrupt(key, err.to_string()))?;
            TimingSummary::from_samples(cfg.clone(), samples)
                .map(StatSummary::Timing)
                .ok_or_else(|| StatError::corrupt(key, "empty timing bucket"))
        }
    }
}
