//! Sink interface and the built-in development sinks.
//!
//! A [`Sink`] consumes one completed batch of summary records per flush.
//! Implementations are plain values handed to the flusher; there is no
//! registration and no global table. The reference HTTP implementation
//! lives in the `statstash-librato` crate; this module carries the two
//! trivial sinks used in development and tests.

use async_trait::async_trait;
use tracing::info;

use crate::{error::StatResult, types::StatSummary};

/// Credentials handed to a sink at flush time.
///
/// Sinks consume whatever subset they need and ignore the rest.
#[derive(Debug, Clone, Default)]
pub struct SinkConfig {
    /// Account or user name, for sinks using basic authentication.
    pub username: Option<String>,
    /// Password or token paired with `username`.
    pub password: Option<String>,
    /// Standalone API key, for sinks that authenticate with one.
    pub api_key: Option<String>,
}

/// Pluggable consumer of a completed summary batch.
///
/// # Contract with the flusher
///
/// Returning `Ok` tells the flusher the batch is delivered, which
/// advances the last-flushed marker. Returning an error leaves the marker
/// alone so the same period is retried later — so a sink should only fail
/// for conditions where re-submission is the right call.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Delivers one batch.
    async fn flush(&self, batch: &[StatSummary], cfg: &SinkConfig) -> StatResult<()>;
}

/// Sink that logs each record's human form and succeeds. Development and
/// test use.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn flush(&self, batch: &[StatSummary], _cfg: &SinkConfig) -> StatResult<()> {
        for record in batch {
            info!(target: "statstash::sink", "{record}");
        }
        Ok(())
    }
}

/// Sink that discards everything and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
    async fn flush(&self, _batch: &[StatSummary], _cfg: &SinkConfig) -> StatResult<()> {
        Ok(())
    }
}
