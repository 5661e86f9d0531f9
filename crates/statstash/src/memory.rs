//! In-memory cache and store implementations.
//!
//! [`MemoryCache`] and [`MemoryStore`] implement the two capability traits
//! against process-local maps. They exist for tests and development; the
//! aggregator is only useful in production when many processes share a
//! real distributed cache, but every behaviour the core relies on —
//! atomic increment, add-if-absent, value-based compare-and-swap, TTL
//! expiry — is honoured here so the full pipeline can run hermetically.
//!
//! # Limitations
//!
//! - Nothing is persisted; data dies with the process.
//! - Expiry is lazy: expired entries are dropped when a read or write
//!   touches them, not on a timer.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    cache::{CacheItem, MetricCache},
    error::{StatError, StatResult},
    store::ConfigStore,
    types::StatConfig,
};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= Instant::now())
    }
}

/// In-memory [`MetricCache`] backed by a [`BTreeMap`].
///
/// Cheaply cloneable via [`Arc`]; all clones share the same underlying
/// data, so a test can hand one clone to a recorder and poke at another.
#[derive(Clone, Default)]
pub struct MemoryCache {
    data: Arc<RwLock<BTreeMap<String, StoredEntry>>>,
}

impl MemoryCache {
    /// Creates an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries, for test assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().values().filter(|entry| !entry.is_expired()).count()
    }

    /// Returns `true` if no live entries remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expires_at(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|ttl| Instant::now() + ttl)
    }
}

#[async_trait]
impl MetricCache for MemoryCache {
    async fn get(&self, key: &str) -> StatResult<Option<CacheItem>> {
        let mut data = self.data.write();
        if data.get(key).is_some_and(StoredEntry::is_expired) {
            data.remove(key);
            return Ok(None);
        }
        Ok(data.get(key).map(|entry| CacheItem::new(key, entry.value.clone())))
    }

    async fn set(&self, item: CacheItem) -> StatResult<()> {
        let mut data = self.data.write();
        data.insert(
            item.key,
            StoredEntry { value: item.value, expires_at: Self::expires_at(item.ttl) },
        );
        Ok(())
    }

    async fn add(&self, item: CacheItem) -> StatResult<()> {
        let mut data = self.data.write();
        if data.get(&item.key).is_some_and(|entry| !entry.is_expired()) {
            return Err(StatError::NotStored);
        }
        data.insert(
            item.key,
            StoredEntry { value: item.value, expires_at: Self::expires_at(item.ttl) },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, initial: u64) -> StatResult<u64> {
        let mut data = self.data.write();

        let (current, expires_at) = match data.get(key) {
            Some(entry) if !entry.is_expired() => {
                let text = std::str::from_utf8(&entry.value)
                    .map_err(|err| StatError::internal(format!("counter at {key}: {err}")))?;
                let value: u64 = text.parse().map_err(|err| {
                    StatError::internal(format!("counter at {key} is not an integer: {err}"))
                })?;
                (value, entry.expires_at)
            }
            _ => (initial, None),
        };

        let updated = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };

        data.insert(
            key.to_owned(),
            StoredEntry { value: Bytes::from(updated.to_string()), expires_at },
        );
        Ok(updated)
    }

    async fn get_multi(&self, keys: &[String]) -> StatResult<HashMap<String, CacheItem>> {
        let data = self.data.read();
        let mut found = HashMap::new();
        for key in keys {
            if let Some(entry) = data.get(key) {
                if !entry.is_expired() {
                    found.insert(key.clone(), CacheItem::new(key.clone(), entry.value.clone()));
                }
            }
        }
        Ok(found)
    }

    async fn delete_multi(&self, keys: &[String]) -> StatResult<()> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn compare_and_swap(&self, expected: &[u8], item: CacheItem) -> StatResult<()> {
        let mut data = self.data.write();
        let current_matches = data
            .get(&item.key)
            .is_some_and(|entry| !entry.is_expired() && entry.value == expected);
        if !current_matches {
            return Err(StatError::Conflict);
        }
        data.insert(
            item.key,
            StoredEntry { value: item.value, expires_at: Self::expires_at(item.ttl) },
        );
        Ok(())
    }
}

/// In-memory [`ConfigStore`] backed by a [`BTreeMap`].
///
/// Like [`MemoryCache`], clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, StatConfig>>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored configs, for test assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if the store holds no configs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> StatResult<Option<StatConfig>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, config: &StatConfig) -> StatResult<()> {
        self.data.write().insert(key.to_owned(), config.clone());
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> StatResult<()> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn active_since(&self, cutoff: DateTime<Utc>) -> Vec<StatResult<StatConfig>> {
        self.data
            .read()
            .values()
            .filter(|cfg| cfg.last_read > cutoff)
            .cloned()
            .map(Ok)
            .collect()
    }

    async fn all(&self) -> StatResult<Vec<StatConfig>> {
        Ok(self.data.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricKind;

    #[tokio::test]
    async fn get_set_delete() {
        let cache = MemoryCache::new();

        cache.set(CacheItem::new("key1", "value1")).await.unwrap();
        let item = cache.get("key1").await.unwrap().expect("present");
        assert_eq!(item.value, Bytes::from("value1"));

        cache.delete_multi(&["key1".to_owned()]).await.unwrap();
        assert!(cache.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_ttl_is_immediately_expired() {
        let cache = MemoryCache::new();
        cache
            .set(CacheItem::new("ephemeral", "x").with_ttl(Duration::ZERO))
            .await
            .unwrap();
        assert!(cache.get("ephemeral").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_refuses_live_entry_but_replaces_expired() {
        let cache = MemoryCache::new();

        cache.add(CacheItem::new("key", "first")).await.unwrap();
        let result = cache.add(CacheItem::new("key", "second")).await;
        assert!(matches!(result, Err(StatError::NotStored)), "got: {result:?}");

        // An expired entry no longer blocks add.
        cache
            .set(CacheItem::new("gone", "stale").with_ttl(Duration::ZERO))
            .await
            .unwrap();
        cache.add(CacheItem::new("gone", "fresh")).await.unwrap();
        let item = cache.get("gone").await.unwrap().expect("present");
        assert_eq!(item.value, Bytes::from("fresh"));
    }

    #[tokio::test]
    async fn increment_initialises_then_accumulates() {
        let cache = MemoryCache::new();

        assert_eq!(cache.increment("hits", 1, 0).await.unwrap(), 1);
        assert_eq!(cache.increment("hits", 1, 0).await.unwrap(), 2);
        assert_eq!(cache.increment("hits", 10, 0).await.unwrap(), 12);

        // Stored representation is decimal ASCII.
        let item = cache.get("hits").await.unwrap().expect("present");
        assert_eq!(item.value, Bytes::from("12"));
    }

    #[tokio::test]
    async fn increment_negative_delta_floors_at_zero() {
        let cache = MemoryCache::new();
        cache.increment("hits", 3, 0).await.unwrap();
        assert_eq!(cache.increment("hits", -10, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_value() {
        let cache = MemoryCache::new();
        cache.set(CacheItem::new("hits", "not a number")).await.unwrap();
        let result = cache.increment("hits", 1, 0).await;
        assert!(matches!(result, Err(StatError::Internal(_))), "got: {result:?}");
    }

    #[tokio::test]
    async fn get_multi_skips_missing_and_expired() {
        let cache = MemoryCache::new();
        cache.set(CacheItem::new("a", "1")).await.unwrap();
        cache.set(CacheItem::new("b", "2").with_ttl(Duration::ZERO)).await.unwrap();

        let keys = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let found = cache.get_multi(&keys).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a").expect("a present").value, Bytes::from("1"));
    }

    #[tokio::test]
    async fn compare_and_swap_success_and_conflict() {
        let cache = MemoryCache::new();
        cache.set(CacheItem::new("key", "v1")).await.unwrap();

        cache.compare_and_swap(b"v1", CacheItem::new("key", "v2")).await.unwrap();
        let item = cache.get("key").await.unwrap().expect("present");
        assert_eq!(item.value, Bytes::from("v2"));

        let result = cache.compare_and_swap(b"v1", CacheItem::new("key", "v3")).await;
        assert!(matches!(result, Err(StatError::Conflict)), "got: {result:?}");

        // CAS against a missing key also conflicts.
        let result = cache.compare_and_swap(b"x", CacheItem::new("absent", "v")).await;
        assert!(matches!(result, Err(StatError::Conflict)), "got: {result:?}");
    }

    #[tokio::test]
    async fn clone_shares_data() {
        let cache1 = MemoryCache::new();
        let cache2 = cache1.clone();

        cache1.set(CacheItem::new("key", "value")).await.unwrap();
        let item = cache2.get("key").await.unwrap().expect("present");
        assert_eq!(item.value, Bytes::from("value"));
    }

    fn config(name: &str, last_read: DateTime<Utc>) -> StatConfig {
        StatConfig {
            name: name.to_owned(),
            source: String::new(),
            kind: MetricKind::Counter,
            last_read,
        }
    }

    #[tokio::test]
    async fn store_put_get_delete() {
        let store = MemoryStore::new();
        let cfg = config("requests", Utc::now());

        store.put(&cfg.store_key(), &cfg).await.unwrap();
        let back = store.get(&cfg.store_key()).await.unwrap().expect("present");
        assert_eq!(back, cfg);

        store.delete_multi(&[cfg.store_key()]).await.unwrap();
        assert!(store.get(&cfg.store_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_since_filters_on_last_read() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let fresh = config("fresh", now);
        let dormant = config("dormant", now - chrono::Duration::hours(72));
        store.put(&fresh.store_key(), &fresh).await.unwrap();
        store.put(&dormant.store_key(), &dormant).await.unwrap();

        let cutoff = now - chrono::Duration::hours(48);
        let active: Vec<_> =
            store.active_since(cutoff).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "fresh");

        let everything = store.all().await.unwrap();
        assert_eq!(everything.len(), 2);
    }
}
