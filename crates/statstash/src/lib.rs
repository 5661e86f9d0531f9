//! Windowed telemetry aggregation over shared cache primitives.
//!
//! `statstash` collects counters, gauges, and timing samples from
//! short-lived, fan-out request handlers that cannot keep state across
//! invocations. Samples accumulate in a shared distributed cache during a
//! fixed five-minute window; an externally delivered tick collapses each
//! window into one summary record per metric and hands the batch to a
//! pluggable sink.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Application handlers                     │
//! │        increment_counter / record_gauge / record_timing      │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Recorder ──► ConfigRegistry ──► period buckets (ss-metric) │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Tick source ──► Flusher ──► summaries ──► Sink             │
//! ├──────────────────────┬───────────────────────────────────────┤
//! │     MetricCache      │            ConfigStore                │
//! │  (shared cache: CAS, │     (durable StatConfig records,      │
//! │   atomic increment)  │        last_read queryable)           │
//! └──────────────────────┴───────────────────────────────────────┘
//! ```
//!
//! The crate owns no scheduler, no transport, and no storage: the cache
//! and durable store are consumed through the [`MetricCache`] and
//! [`ConfigStore`] capability traits, and the flush tick arrives from
//! outside (webhook, cron, loop). [`MemoryCache`] and [`MemoryStore`]
//! bind the traits to process-local maps for tests and development; the
//! reference HTTP sink lives in the sibling `statstash-librato` crate.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use statstash::{Flusher, LogSink, MemoryCache, MemoryStore, Recorder, SinkConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(MemoryCache::new());
//! let store = Arc::new(MemoryStore::new());
//!
//! let recorder = Recorder::new(cache.clone(), store.clone());
//! recorder.increment_counter("requests", "web-1").await?;
//! recorder.record_gauge("queue_depth", "web-1", 17.0).await?;
//! recorder.record_timing("render_ms", "web-1", 12.5, 0.5).await.ok();
//!
//! // Delivered by the host's tick, usually once per period:
//! let flusher = Flusher::new(cache, store);
//! flusher.flush_previous(&LogSink, &SinkConfig::default()).await.ok();
//! # Ok(())
//! # }
//! ```
//!
//! # Delivery semantics
//!
//! At-least-once to the sink under normal operation: the last-flushed
//! marker (`ss-lpf`) advances only after a sink acknowledges, so a failed
//! delivery is retried on a later tick. Racing flushers on the same
//! period each deliver; the [`StatError::FlushTooSoon`] gate suppresses
//! rapid re-flushes, and hosts should serialise ticks where duplicates
//! are costly.

#![deny(unsafe_code)]

pub mod cache;
mod codec;
pub mod error;
pub mod flusher;
pub mod memory;
pub mod period;
pub mod recorder;
pub mod registry;
pub mod sink;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod types;

pub use cache::{CacheItem, MetricCache};
pub use error::{ConfigError, StatError, StatResult};
pub use flusher::{Flusher, LAST_FLUSHED_KEY};
pub use memory::{MemoryCache, MemoryStore};
pub use period::{AGGREGATION_PERIOD, BUCKET_TTL, period_start};
pub use recorder::{CasRetryConfig, Recorder};
pub use registry::ConfigRegistry;
pub use sink::{LogSink, NullSink, Sink, SinkConfig};
pub use store::ConfigStore;
pub use types::{
    CounterSummary, GaugeSummary, MetricKind, StatConfig, StatSummary, TimingSummary,
};
