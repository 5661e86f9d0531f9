//! Librato metrics sink.
//!
//! [`LibratoSink`] binds the statstash [`Sink`] trait to the Librato
//! metrics API: one form-encoded POST per flush, authenticated with HTTP
//! Basic auth from the [`SinkConfig`]'s username and password (the
//! `api_key` field is not used by this backend).
//!
//! # Wire format
//!
//! The batch is flattened into indexed form fields, indices assigned in
//! first-appearance order within each family:
//!
//! - counter i: `counters[i][name]`, `counters[i][value]`, and
//!   `counters[i][source]` when the source is non-empty.
//! - gauge i: `gauges[i][name]`, `gauges[i][value]`, optional source.
//! - a timing summary becomes two gauge entries: the primary carries
//!   `count`, `min`, `max`, `sum`, and `sum_squares`; a companion named
//!   `{name}.90` carries the 90th-percentile `count`, `max`, and `sum`.
//!
//! # Status handling
//!
//! A transport error is logged and returned, which tells the flusher to
//! retry the period later. A non-2xx response is logged (body capped) but
//! reported as success: the flusher advances its last-flushed marker on
//! sink success, and treating rejections as retryable would re-submit the
//! same batch every period. Hosts that prefer duplicates over loss can
//! wrap the sink and translate the log into an error.

use async_trait::async_trait;
use statstash::{ConfigError, Sink, SinkConfig, StatError, StatResult, StatSummary};
use tracing::{debug, error, warn};

/// The public Librato metrics endpoint.
pub const LIBRATO_API_ENDPOINT: &str = "https://metrics-api.librato.com/v1/metrics";

/// Default request timeout.
const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// How much of a rejection body makes it into the log.
const MAX_LOGGED_BODY: usize = 1024;

/// Configuration for [`LibratoSink`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use statstash_librato::LibratoConfig;
///
/// let config = LibratoConfig::builder()
///     .endpoint("https://metrics-api.librato.com/v1/metrics")
///     .timeout(Duration::from_secs(10))
///     .build()
///     .expect("valid config");
/// ```
#[derive(Debug, Clone)]
pub struct LibratoConfig {
    endpoint: String,
    timeout: std::time::Duration,
}

impl LibratoConfig {
    /// Starts building a config; defaults to the public endpoint with a
    /// 30-second timeout.
    #[must_use]
    pub fn builder() -> LibratoConfigBuilder {
        LibratoConfigBuilder {
            endpoint: LIBRATO_API_ENDPOINT.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// The endpoint batches are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for LibratoConfig {
    fn default() -> Self {
        Self { endpoint: LIBRATO_API_ENDPOINT.to_owned(), timeout: DEFAULT_TIMEOUT }
    }
}

/// Builder for [`LibratoConfig`].
pub struct LibratoConfigBuilder {
    endpoint: String,
    timeout: std::time::Duration,
}

impl LibratoConfigBuilder {
    /// Overrides the endpoint. Useful for proxies and tests.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the config, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the timeout is zero.
    pub fn build(self) -> Result<LibratoConfig, ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "timeout",
                value: format!("{}ms", self.timeout.as_millis()),
            });
        }
        Ok(LibratoConfig { endpoint: self.endpoint, timeout: self.timeout })
    }
}

/// Sink that forwards summary batches to Librato.
pub struct LibratoSink {
    client: reqwest::Client,
    config: LibratoConfig,
}

impl LibratoSink {
    /// Creates a sink against the public endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StatError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn new() -> StatResult<Self> {
        Self::with_config(LibratoConfig::default())
    }

    /// Creates a sink with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StatError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn with_config(config: LibratoConfig) -> StatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| StatError::internal(format!("building http client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Sink for LibratoSink {
    async fn flush(&self, batch: &[StatSummary], cfg: &SinkConfig) -> StatResult<()> {
        let params = encode_form(batch);
        debug!(records = batch.len(), pairs = params.len(), "posting batch to librato");

        let response = self
            .client
            .post(&self.config.endpoint)
            .basic_auth(cfg.username.clone().unwrap_or_default(), cfg.password.clone())
            .form(&params)
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "failed to post metrics to librato");
                StatError::connection(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_LOGGED_BODY)
                .collect();
            warn!(status = status.as_u16(), body = %body, "librato rejected the batch");
            // Still success from the flusher's point of view: re-submitting
            // a rejected batch every period would storm duplicates.
        }
        Ok(())
    }
}

fn post_key(family: &str, index: usize, field: &str) -> String {
    format!("{family}[{index}][{field}]")
}

/// Flattens a batch into Librato's indexed form fields.
fn encode_form(batch: &[StatSummary]) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut counters = 0usize;
    let mut gauges = 0usize;

    for record in batch {
        match record {
            StatSummary::Counter(counter) => {
                params.push((post_key("counters", counters, "name"), counter.config.name.clone()));
                params.push((post_key("counters", counters, "value"), counter.count.to_string()));
                if !counter.config.source.is_empty() {
                    params.push((
                        post_key("counters", counters, "source"),
                        counter.config.source.clone(),
                    ));
                }
                counters += 1;
            }
            StatSummary::Gauge(gauge) => {
                params.push((post_key("gauges", gauges, "name"), gauge.config.name.clone()));
                params.push((post_key("gauges", gauges, "value"), gauge.value.to_string()));
                if !gauge.config.source.is_empty() {
                    params.push((
                        post_key("gauges", gauges, "source"),
                        gauge.config.source.clone(),
                    ));
                }
                gauges += 1;
            }
            StatSummary::Timing(timing) => {
                params.push((post_key("gauges", gauges, "name"), timing.config.name.clone()));
                params.push((post_key("gauges", gauges, "count"), timing.count.to_string()));
                params.push((post_key("gauges", gauges, "min"), timing.min.to_string()));
                params.push((post_key("gauges", gauges, "max"), timing.max.to_string()));
                params.push((post_key("gauges", gauges, "sum"), timing.sum.to_string()));
                params.push((
                    post_key("gauges", gauges, "sum_squares"),
                    timing.sum_squares.to_string(),
                ));
                if !timing.config.source.is_empty() {
                    params.push((
                        post_key("gauges", gauges, "source"),
                        timing.config.source.clone(),
                    ));
                }
                gauges += 1;

                // The 90th-percentile companion rides along as its own gauge.
                let companion = format!("{}.90", timing.config.name);
                params.push((post_key("gauges", gauges, "name"), companion));
                params.push((
                    post_key("gauges", gauges, "count"),
                    timing.ninth_decile_count.to_string(),
                ));
                params.push((
                    post_key("gauges", gauges, "max"),
                    timing.ninth_decile_value.to_string(),
                ));
                params.push((
                    post_key("gauges", gauges, "sum"),
                    timing.ninth_decile_sum.to_string(),
                ));
                if !timing.config.source.is_empty() {
                    params.push((
                        post_key("gauges", gauges, "source"),
                        timing.config.source.clone(),
                    ));
                }
                gauges += 1;
            }
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use statstash::{CounterSummary, GaugeSummary, MetricKind, StatConfig, TimingSummary};

    use super::*;

    fn config(kind: MetricKind, name: &str, source: &str) -> StatConfig {
        StatConfig {
            name: name.to_owned(),
            source: source.to_owned(),
            kind,
            last_read: Utc::now(),
        }
    }

    fn counter(name: &str, source: &str, count: u64) -> StatSummary {
        StatSummary::Counter(CounterSummary {
            config: config(MetricKind::Counter, name, source),
            count,
        })
    }

    fn gauge(name: &str, source: &str, value: f64) -> StatSummary {
        StatSummary::Gauge(GaugeSummary { config: config(MetricKind::Gauge, name, source), value })
    }

    fn timing(name: &str, source: &str, samples: Vec<f64>) -> StatSummary {
        StatSummary::Timing(
            TimingSummary::from_samples(config(MetricKind::Timing, name, source), samples)
                .expect("non-empty samples"),
        )
    }

    fn value_of<'a>(params: &'a [(String, String)], key: &str) -> &'a str {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or_else(|| panic!("no {key} in {params:?}"))
    }

    #[test]
    fn counters_and_gauges_index_independently() {
        let batch = vec![
            counter("requests", "web-1", 12),
            gauge("temperature", "raleigh", 24.0),
            counter("errors", "", 3),
            gauge("depth", "", 7.5),
        ];
        let params = encode_form(&batch);

        assert_eq!(value_of(&params, "counters[0][name]"), "requests");
        assert_eq!(value_of(&params, "counters[0][value]"), "12");
        assert_eq!(value_of(&params, "counters[0][source]"), "web-1");
        assert_eq!(value_of(&params, "counters[1][name]"), "errors");
        assert_eq!(value_of(&params, "counters[1][value]"), "3");

        assert_eq!(value_of(&params, "gauges[0][name]"), "temperature");
        assert_eq!(value_of(&params, "gauges[0][value]"), "24");
        assert_eq!(value_of(&params, "gauges[0][source]"), "raleigh");
        assert_eq!(value_of(&params, "gauges[1][name]"), "depth");
        assert_eq!(value_of(&params, "gauges[1][value]"), "7.5");
    }

    #[test]
    fn empty_source_omits_the_source_field() {
        let params = encode_form(&[counter("requests", "", 1)]);
        assert!(
            !params.iter().any(|(k, _)| k.contains("source")),
            "empty source must not be encoded: {params:?}"
        );
    }

    #[test]
    fn timing_emits_primary_and_ninth_decile_gauges() {
        let samples: Vec<f64> = (0..10).map(f64::from).collect();
        let params = encode_form(&[timing("render", "web-1", samples)]);

        assert_eq!(value_of(&params, "gauges[0][name]"), "render");
        assert_eq!(value_of(&params, "gauges[0][count]"), "10");
        assert_eq!(value_of(&params, "gauges[0][min]"), "0");
        assert_eq!(value_of(&params, "gauges[0][max]"), "9");
        assert_eq!(value_of(&params, "gauges[0][sum]"), "45");
        assert_eq!(value_of(&params, "gauges[0][sum_squares]"), "285");
        assert_eq!(value_of(&params, "gauges[0][source]"), "web-1");

        assert_eq!(value_of(&params, "gauges[1][name]"), "render.90");
        assert_eq!(value_of(&params, "gauges[1][count]"), "9");
        assert_eq!(value_of(&params, "gauges[1][max]"), "8");
        assert_eq!(value_of(&params, "gauges[1][sum]"), "36");
        assert_eq!(value_of(&params, "gauges[1][source]"), "web-1");
    }

    #[test]
    fn timing_after_gauge_continues_the_gauge_index() {
        let params = encode_form(&[
            gauge("depth", "", 1.0),
            timing("render", "", vec![5.0]),
        ]);
        assert_eq!(value_of(&params, "gauges[0][name]"), "depth");
        assert_eq!(value_of(&params, "gauges[1][name]"), "render");
        assert_eq!(value_of(&params, "gauges[2][name]"), "render.90");
    }

    #[test]
    fn empty_batch_encodes_to_nothing() {
        assert!(encode_form(&[]).is_empty());
    }

    #[test]
    fn config_builder_validates_timeout() {
        let result = LibratoConfig::builder().timeout(std::time::Duration::ZERO).build();
        assert!(result.is_err());

        let config = LibratoConfig::builder().endpoint("http://localhost:9999").build().unwrap();
        assert_eq!(config.endpoint(), "http://localhost:9999");
    }
}
