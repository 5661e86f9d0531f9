//! Data model: metric identity, per-metric configuration, and the summary
//! records handed to sinks.
//!
//! A metric is identified by the triple `(kind, name, source)`. The triple
//! is the primary key of [`StatConfig`] and determines every derived cache
//! key; no other component fabricates keys.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::period_start;

/// The three metric kinds the aggregator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Monotonic count accumulated via atomic increment.
    Counter,
    /// Point-in-time value; the last write within a period wins.
    Gauge,
    /// Timing sample; every recorded value within a period is kept.
    Timing,
}

impl MetricKind {
    /// The wire name of the kind, used in cache and durable-store keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timing => "timing",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record marking a metric as live.
///
/// Created lazily on the first recording of a metric, refreshed whenever a
/// lookup materialises it (creation, or when `last_read` has gone stale),
/// and removed only by an explicit purge. `last_read` drives inclusion in
/// flush enumeration: a config not read for 48 hours is dormant and will
/// be skipped by the next flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatConfig {
    /// Opaque, non-empty metric name.
    pub name: String,
    /// Opaque tag for the emitting subject (host, region, tenant). May be
    /// empty.
    pub source: String,
    /// Metric kind.
    pub kind: MetricKind,
    /// Last time a recording lookup materialised this config.
    pub last_read: DateTime<Utc>,
}

impl StatConfig {
    /// Durable-store key name for the given identity:
    /// `"{kind}-{name}-{source}"`.
    #[must_use]
    pub fn key_name(kind: MetricKind, name: &str, source: &str) -> String {
        format!("{kind}-{name}-{source}")
    }

    /// Durable-store key name for this config.
    #[must_use]
    pub fn store_key(&self) -> String {
        Self::key_name(self.kind, &self.name, &self.source)
    }

    /// Cache key of the bucket holding this metric's samples for the
    /// period containing `at`, shifted by `offset` whole periods:
    /// `"ss-metric:{kind}-{name}-{source}-{period_start_unix}"`.
    #[must_use]
    pub fn bucket_key(&self, at: DateTime<Utc>, offset: i64) -> String {
        format!(
            "ss-metric:{}-{}-{}-{}",
            self.kind,
            self.name,
            self.source,
            period_start(at, offset).timestamp()
        )
    }
}

impl fmt::Display for StatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[StatConfig] name={}, source={}, kind={}, lastread={}",
            self.name, self.source, self.kind, self.last_read
        )
    }
}

/// Summary of one counter bucket over one aggregation period.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSummary {
    /// The metric this summary belongs to.
    pub config: StatConfig,
    /// Total accumulated count for the period.
    pub count: u64,
}

impl fmt::Display for CounterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Counter: name={}, source={}] Value: {}",
            self.config.name, self.config.source, self.count
        )
    }
}

/// Summary of one gauge bucket: the most recent sample of the period.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSummary {
    /// The metric this summary belongs to.
    pub config: StatConfig,
    /// The surviving sample.
    pub value: f64,
}

impl fmt::Display for GaugeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Gauge: name={}, source={}] Value: {}",
            self.config.name, self.config.source, self.value
        )
    }
}

/// Statistical summary of one timing bucket over one aggregation period.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSummary {
    /// The metric this summary belongs to.
    pub config: StatConfig,
    /// Number of samples.
    pub count: usize,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
    /// Sum of all samples.
    pub sum: f64,
    /// Sum of squared samples.
    pub sum_squares: f64,
    /// Median sample (mean of the middle pair when the count is even).
    pub median: f64,
    /// `ceil(0.9 * count)`: how many samples fall at or below the 90th
    /// percentile cut.
    pub ninth_decile_count: usize,
    /// The sample at the 90th percentile cut.
    pub ninth_decile_value: f64,
    /// Sum of the samples below the cut.
    pub ninth_decile_sum: f64,
}

impl TimingSummary {
    /// Builds the summary from the raw samples of one bucket.
    ///
    /// Returns `None` for an empty sample list, which a well-formed bucket
    /// never produces; callers treat it as corruption.
    #[must_use]
    pub fn from_samples(config: StatConfig, mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);

        let count = samples.len();
        let min = samples[0];
        let max = samples[count - 1];
        let median = if count == 1 {
            samples[0]
        } else if count % 2 == 0 {
            (samples[count / 2 - 1] + samples[count / 2]) / 2.0
        } else {
            samples[count / 2]
        };

        let ninth_decile_count = (0.9 * count as f64).ceil() as usize;
        let ninth_decile_value = samples[ninth_decile_count - 1];

        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        let mut ninth_decile_sum = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            if i < ninth_decile_count {
                ninth_decile_sum += sample;
            }
            sum += sample;
            sum_squares += sample * sample;
        }

        Some(Self {
            config,
            count,
            min,
            max,
            sum,
            sum_squares,
            median,
            ninth_decile_count,
            ninth_decile_value,
            ninth_decile_sum,
        })
    }
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Timing: name={}, source={}] Count: {}, Min: {}, Max: {}, Sum: {}, SumSquares: {}, \
             Median: {}, 90th percentile (count: {}, value: {}, sum: {})",
            self.config.name,
            self.config.source,
            self.count,
            self.min,
            self.max,
            self.sum,
            self.sum_squares,
            self.median,
            self.ninth_decile_count,
            self.ninth_decile_value,
            self.ninth_decile_sum
        )
    }
}

/// One summarised bucket, tagged by metric kind.
///
/// A flush produces a heterogeneous batch of these; sinks match on the
/// variant rather than downcasting.
#[derive(Debug, Clone, PartialEq)]
pub enum StatSummary {
    /// Summary of a counter bucket.
    Counter(CounterSummary),
    /// Summary of a gauge bucket.
    Gauge(GaugeSummary),
    /// Summary of a timing bucket.
    Timing(TimingSummary),
}

impl StatSummary {
    /// The config of the summarised metric.
    #[must_use]
    pub fn config(&self) -> &StatConfig {
        match self {
            Self::Counter(s) => &s.config,
            Self::Gauge(s) => &s.config,
            Self::Timing(s) => &s.config,
        }
    }
}

impl fmt::Display for StatSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(s) => s.fmt(f),
            Self::Gauge(s) => s.fmt(f),
            Self::Timing(s) => s.fmt(f),
        }
    }
}
