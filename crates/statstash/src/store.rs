//! Durable-store capability trait.
//!
//! [`ConfigStore`] is the contract over whatever durable system keeps
//! [`StatConfig`] records alive between processes: a SQL table, a document
//! store, the in-memory fake in [`memory`](crate::memory). Only
//! `last_read` needs to be queryable; everything else is keyed access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{error::StatResult, types::StatConfig};

/// Capability contract over the durable config store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Retrieves the config stored under `key`
    /// (see [`StatConfig::store_key`]), or `Ok(None)` if absent.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StatResult<Option<StatConfig>>;

    /// Stores `config` under `key`, overwriting any previous record.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn put(&self, key: &str, config: &StatConfig) -> StatResult<()>;

    /// Deletes many records. Missing keys are not an error.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn delete_multi(&self, keys: &[String]) -> StatResult<()>;

    /// Streams every config whose `last_read` is strictly after `cutoff`,
    /// materialised as a vector of per-record results.
    ///
    /// A backend whose iterator fails mid-stream pushes the error as the
    /// final element and stops, so callers receive the accumulated prefix
    /// and can decide whether to proceed.
    async fn active_since(&self, cutoff: DateTime<Utc>) -> Vec<StatResult<StatConfig>>;

    /// Retrieves every config in the store, active or dormant.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn all(&self) -> StatResult<Vec<StatConfig>>;
}
