//! Per-metric config discovery and liveness tracking.
//!
//! [`ConfigRegistry`] resolves `(kind, name, source)` to a [`StatConfig`],
//! creating the durable record lazily on first sight and keeping its
//! `last_read` fresh so flush enumeration knows which metrics are live.
//!
//! # Lookup path
//!
//! ```text
//! recording call → check shared cache (ss-conf:*, 24h TTL)
//!                → miss? fetch from durable store
//!                → absent? synthesize; stale (≥ 48h)? refresh last_read
//!                → write back when created or refreshed
//!                → re-add to the cache
//! ```
//!
//! A failed durable write is logged and skips the cache re-add, but the
//! in-memory config is still returned so the caller's recording can
//! proceed; the next lookup retries the write.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    cache::{CacheItem, MetricCache},
    codec,
    error::{StatError, StatResult},
    store::ConfigStore,
    types::{MetricKind, StatConfig},
};

/// Cached configs expire after a day; the durable store stays the source
/// of truth.
const CONFIG_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Hours without a materialising read before a config counts as dormant.
const DORMANT_AFTER_HOURS: i64 = 48;

fn config_cache_key(kind: MetricKind, name: &str, source: &str) -> String {
    format!("ss-conf:{}", StatConfig::key_name(kind, name, source))
}

/// Lazy discovery and persistence of per-metric configs, with the shared
/// cache in front of the durable store.
#[derive(Clone)]
pub struct ConfigRegistry {
    cache: Arc<dyn MetricCache>,
    store: Arc<dyn ConfigStore>,
}

impl ConfigRegistry {
    /// Creates a registry over the given cache and store.
    #[must_use]
    pub fn new(cache: Arc<dyn MetricCache>, store: Arc<dyn ConfigStore>) -> Self {
        Self { cache, store }
    }

    /// Resolves the config for a metric identity, materialising it if
    /// needed.
    ///
    /// Idempotent per identity over a 24-hour window: repeat lookups are
    /// served from the cache and do not touch `last_read`.
    ///
    /// # Errors
    ///
    /// Propagates durable-store read failures. Durable *write* failures
    /// are logged and swallowed (see module docs).
    pub async fn get_config(
        &self,
        kind: MetricKind,
        name: &str,
        source: &str,
    ) -> StatResult<StatConfig> {
        let cache_key = config_cache_key(kind, name, source);

        // Fast path: the shared cache. Any failure here falls through to
        // the durable store.
        match self.cache.get(&cache_key).await {
            Ok(Some(item)) => match codec::decode::<StatConfig>(&item.value) {
                Ok(cfg) => return Ok(cfg),
                Err(err) => {
                    warn!(key = %cache_key, error = %err, "undecodable cached stat config");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(key = %cache_key, error = %err, "stat config cache read failed");
            }
        }

        let store_key = StatConfig::key_name(kind, name, source);
        let now = Utc::now();
        let mut update_needed = false;

        let config = match self.store.get(&store_key).await? {
            Some(mut cfg) => {
                if now - cfg.last_read >= chrono::Duration::hours(DORMANT_AFTER_HOURS) {
                    cfg.last_read = now;
                    update_needed = true;
                }
                cfg
            }
            None => {
                update_needed = true;
                StatConfig {
                    name: name.to_owned(),
                    source: source.to_owned(),
                    kind,
                    last_read: now,
                }
            }
        };

        let mut cacheable = true;
        if update_needed {
            if let Err(err) = self.store.put(&store_key, &config).await {
                warn!(config = %config, error = %err, "failed to persist stat config");
                cacheable = false;
            }
        }

        if cacheable {
            if let Ok(bytes) = codec::encode(&config) {
                // Add, not set: a racing writer's copy is just as good.
                let _ = self
                    .cache
                    .add(CacheItem::new(cache_key, bytes).with_ttl(CONFIG_CACHE_TTL))
                    .await;
            }
        }

        Ok(config)
    }

    /// Enumerates every live config, keyed by its bucket key for the
    /// period containing `at`.
    ///
    /// A mid-stream store failure returns the accumulated prefix together
    /// with the error; the caller decides whether the partial view is
    /// usable.
    pub async fn active_configs(
        &self,
        at: DateTime<Utc>,
    ) -> (HashMap<String, StatConfig>, Option<StatError>) {
        let cutoff = at - chrono::Duration::hours(DORMANT_AFTER_HOURS);
        let mut configs = HashMap::new();
        let mut failure = None;

        for item in self.store.active_since(cutoff).await {
            match item {
                Ok(cfg) => {
                    configs.insert(cfg.bucket_key(at, 0), cfg);
                }
                Err(err) => {
                    warn!(error = %err, "stat config enumeration failed mid-stream");
                    failure = Some(err);
                    break;
                }
            }
        }

        debug!(count = configs.len(), cutoff = %cutoff, "enumerated active stat configs");
        (configs, failure)
    }

    /// Every config in the store, dormant ones included.
    pub async fn all_configs(&self) -> StatResult<Vec<StatConfig>> {
        self.store.all().await
    }

    /// Deletes every config from the durable store, then best-effort
    /// drops the current and previous period's buckets from the cache.
    ///
    /// # Errors
    ///
    /// A durable deletion failure aborts before any cache deletion; cache
    /// deletion failures are logged only.
    pub async fn purge(&self) -> StatResult<()> {
        let configs = self.all_configs().await?;
        if configs.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut store_keys = Vec::with_capacity(configs.len());
        let mut bucket_keys = Vec::with_capacity(configs.len() * 2);
        for cfg in &configs {
            store_keys.push(cfg.store_key());
            bucket_keys.push(cfg.bucket_key(now, 0));
            bucket_keys.push(cfg.bucket_key(now, -1));
        }

        self.store.delete_multi(&store_keys).await?;

        if let Err(err) = self.cache.delete_multi(&bucket_keys).await {
            warn!(error = %err, "purge: failed to drop buckets from cache");
        }
        Ok(())
    }
}
