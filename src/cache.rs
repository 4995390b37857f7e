/// Request Caching Module
///
/// In-memory LRU cache with TTL for hot read-endpoint responses (status,
/// token detail). Keys embed the chain tip height, so a committed block
/// naturally invalidates stale entries.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CachedEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CachedEntry {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct CacheManager {
    json_cache: Arc<RwLock<LruCache<String, CachedEntry>>>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager {
    pub fn new() -> Self {
        Self::with_capacity(5000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            json_cache: Arc::new(RwLock::new(LruCache::new(capacity))),
        }
    }

    /// Return the cached value for `key`, or run `compute`, cache its
    /// result for `ttl` and return it.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, Box<dyn std::error::Error + Send + Sync>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Box<dyn std::error::Error + Send + Sync>>>,
    {
        {
            let mut cache = self.json_cache.write().await;
            if let Some(entry) = cache.get(key) {
                if !entry.is_expired() {
                    if let Ok(value) = serde_json::from_value(entry.value.clone()) {
                        return Ok(value);
                    }
                }
            }
        }

        let value = compute().await?;
        let json = serde_json::to_value(&value)?;
        let mut cache = self.json_cache.write().await;
        cache.put(key.to_string(), CachedEntry::new(json, ttl));
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.json_cache.write().await;
        cache.pop(key);
    }
}
