//! Response cache with a soft time-to-live.
//!
//! Entries are stored under `cache:<endpoint>`. Expiry never evicts: an
//! expired entry is still returned, flagged as stale, because stale data
//! beats no data when the network is gone.

use crate::clock::Clock;
use crate::storage::{StorageError, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Key prefix for cached responses.
pub const CACHE_PREFIX: &str = "cache:";

/// Storage key for an endpoint's cached response.
#[must_use]
pub fn cache_key(endpoint: &str) -> String {
    format!("{CACHE_PREFIX}{endpoint}")
}

/// A cached response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Storage key (`cache:<endpoint>`).
    pub key: String,
    /// The response payload.
    pub payload: Value,
    /// When the payload was cached, in epoch milliseconds.
    pub cached_at: u64,
    /// When the payload becomes stale, in epoch milliseconds.
    pub expires_at: u64,
}

impl CacheEntry {
    /// Whether the entry is past its time-to-live at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Cached responses keyed by endpoint.
#[derive(Clone)]
pub struct ResponseCache {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a cache over `store`.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Cache `payload` for `endpoint`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be persisted.
    pub fn put(
        &self,
        endpoint: &str,
        payload: Value,
        ttl: Duration,
    ) -> Result<CacheEntry, StorageError> {
        let now = self.clock.now_millis();
        let entry = CacheEntry {
            key: cache_key(endpoint),
            payload,
            cached_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
        };
        self.store.write(&entry.key, &entry)?;
        trace!(key = %entry.key, expires_at = entry.expires_at, "Cached response");
        Ok(entry)
    }

    /// The entry for `endpoint`, expired or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read or parsed.
    pub fn get(&self, endpoint: &str) -> Result<Option<CacheEntry>, StorageError> {
        self.store.read(&cache_key(endpoint))
    }

    /// Whether `entry` is stale right now.
    #[must_use]
    pub fn is_stale(&self, entry: &CacheEntry) -> bool {
        entry.is_expired_at(self.clock.now_millis())
    }

    /// Drop every cached response.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.store.keys_with_prefix(CACHE_PREFIX)?;
        for key in &keys {
            self.store.remove(key)?;
        }
        Ok(keys.len())
    }
}
