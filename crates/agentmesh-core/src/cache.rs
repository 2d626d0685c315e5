//! Opaque key-value cache boundary.
//!
//! The orchestration core never depends on a durable store; agents that want
//! to memoize upstream answers go through [`CacheStore`]. [`MemoryCache`]
//! satisfies the contract in-process.

use crate::MeshResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A key-value cache with per-entry time-to-live.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value for `key` if present and not expired.
    async fn get(&self, key: &str) -> MeshResult<Option<serde_json::Value>>;

    /// Stores `value` under `key`; `None` means no expiry.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>)
        -> MeshResult<()>;

    /// Removes `key`, returning whether it was present.
    async fn delete(&self, key: &str) -> MeshResult<bool>;
}

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process [`CacheStore`]. Expired entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but were not read since.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> MeshResult<Option<serde_json::Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> MeshResult<()> {
        // a ttl past the clock's range never expires
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> MeshResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
