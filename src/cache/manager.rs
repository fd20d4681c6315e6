//! Cache manager for expiring entries in the shared key-value store
//!
//! Provides a `CacheManager` that stores serializable data as JSON entries with
//! creation and expiry timestamps. Expired entries are deleted lazily on read,
//! so callers never observe stale data; `clear_expired` only reclaims space.

use chrono::Duration;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::storage::{KeyValueStore, StoreError};

/// Prefix applied to every key the cache writes
pub const DEFAULT_PREFIX: &str = "cache_";

/// Schema tag written on new entries
pub const ENTRY_VERSION: &str = "1.0";

/// Default time-to-live for `set_cached_item` (1 hour)
pub fn default_ttl() -> Duration {
    Duration::hours(1)
}

/// Default age limit for `clear_expired` (24 hours)
pub fn default_max_age() -> Duration {
    Duration::hours(24)
}

/// Failures inside the cache. They never escape the public API.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode or decode entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("negative ttl: {0} ms")]
    NegativeTtl(i64),
}

/// Entry as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// The cached data
    pub data: T,
    /// Creation instant, epoch milliseconds
    pub created_at: i64,
    /// Expiry instant, epoch milliseconds
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl<T> CacheEntry<T> {
    /// Whether the entry is logically absent at `now_ms`
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Whether the entry is older than `max_age` at `now_ms`
    ///
    /// Timestamps come from the shared store, so the age saturates instead of
    /// overflowing on corrupted values.
    pub fn is_older_than(&self, max_age: Duration, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.created_at) > max_age.num_milliseconds()
    }
}

/// Manages expiring entries under a key prefix of a shared store
///
/// The manager owns only the keys carrying its prefix; every bulk operation
/// filters on it, so other subsystems can share the same store safely.
#[derive(Debug, Clone)]
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl CacheManager {
    /// Creates a CacheManager over `store` using the wall clock and the default prefix
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a CacheManager with a custom clock
    ///
    /// Useful for testing expiry with simulated time.
    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Replaces the namespace prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Writes data to the cache
    ///
    /// # Arguments
    /// * `key` - Logical key (the prefix is added internally)
    /// * `data` - The data to cache
    /// * `ttl` - Time-to-live; `None` uses [`default_ttl`]
    /// * `tags` - Labels for bulk invalidation via [`invalidate_tag`](Self::invalidate_tag)
    ///
    /// Failures (serialization, quota exceeded, I/O) are logged and the call
    /// becomes a no-op.
    pub fn set_cached_item<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) {
        if let Err(err) = self.try_set(key, data, ttl.unwrap_or_else(default_ttl), tags) {
            tracing::warn!(key, error = %err, "failed to write cache entry");
        }
    }

    fn try_set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(), CacheError> {
        let ttl_ms = ttl.num_milliseconds();
        if ttl_ms < 0 {
            return Err(CacheError::NegativeTtl(ttl_ms));
        }

        let now = self.clock.now_millis();
        let entry = CacheEntry {
            data,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            version: Some(ENTRY_VERSION.to_string()),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
        };

        let json = serde_json::to_string(&entry)?;
        self.store.set(&self.namespaced(key), &json)?;
        tracing::debug!(key, ttl_ms, "cache entry written");
        Ok(())
    }

    /// Reads an entry from the cache
    ///
    /// Returns `None` if the entry doesn't exist, has expired (the expired
    /// entry is deleted), cannot be parsed, or its data doesn't decode as `T`.
    pub fn get_cached_item<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        match self.try_get(key) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to read cache entry");
                None
            }
        }
    }

    fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        let namespaced = self.namespaced(key);
        let Some(raw) = self.store.get(&namespaced)? else {
            return Ok(None);
        };

        // Expiry is checked on the untyped entry so stale data is dropped even
        // when the caller asks for a different payload type.
        let entry: CacheEntry<Value> = serde_json::from_str(&raw)?;
        if entry.is_expired_at(self.clock.now_millis()) {
            self.store.remove(&namespaced)?;
            tracing::debug!(key, "expired cache entry removed on read");
            return Ok(None);
        }

        let data = serde_json::from_value(entry.data)?;
        Ok(Some(CacheEntry {
            data,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            version: entry.version,
            tags: entry.tags,
        }))
    }

    /// Reads fresh data, or fetches and caches it on a miss
    ///
    /// The fetcher's error is returned unchanged and nothing is cached.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[&str],
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get_cached_item::<T>(key) {
            return Ok(cached.data);
        }

        let data = fetch().await?;
        self.set_cached_item(key, &data, ttl, tags);
        Ok(data)
    }

    /// Deletes an entry. Removing an absent key is not an error.
    pub fn remove_item(&self, key: &str) {
        if let Err(err) = self.store.remove(&self.namespaced(key)) {
            tracing::warn!(key, error = %err, "failed to remove cache entry");
        }
    }

    /// Logical keys currently stored in this cache's namespace
    pub fn keys(&self) -> Vec<String> {
        match self.store.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to list cache keys");
                Vec::new()
            }
        }
    }

    /// Sweeps entries that have expired or outlived `max_age`
    ///
    /// `None` uses [`default_max_age`]. Returns the number of entries removed.
    /// Unparsable entries are left in place.
    pub fn clear_expired(&self, max_age: Option<Duration>) -> usize {
        let max_age = max_age.unwrap_or_else(default_max_age);
        let now = self.clock.now_millis();

        self.sweep(|key, raw| match serde_json::from_str::<CacheEntry<Value>>(raw) {
            Ok(entry) => entry.is_expired_at(now) || entry.is_older_than(max_age, now),
            Err(err) => {
                tracing::warn!(key, error = %err, "skipping unparsable cache entry during sweep");
                false
            }
        })
    }

    /// Removes every entry carrying `tag`. Returns the number removed.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.sweep(|_, raw| {
            serde_json::from_str::<CacheEntry<Value>>(raw)
                .map(|entry| entry.tags.contains(tag))
                .unwrap_or(false)
        })
    }

    /// Removes every key in this cache's namespace. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        self.sweep(|_, _| true)
    }

    /// Removes namespaced entries whose raw value matches `should_remove`
    fn sweep(&self, mut should_remove: impl FnMut(&str, &str) -> bool) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list cache keys");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|key| key.starts_with(&self.prefix)) {
            let raw = match self.store.get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "failed to read cache entry");
                    continue;
                }
            };
            if !should_remove(key, &raw) {
                continue;
            }
            match self.store.remove(key) {
                Ok(()) => removed += 1,
                Err(err) => tracing::warn!(key = %key, error = %err, "failed to remove cache entry"),
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "cache sweep finished");
        }
        removed
    }
}
