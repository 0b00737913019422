//! Best-effort typed cache facade.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{CacheBackend, MemoryBackend};
use super::key::CacheKey;
use crate::config::CacheTtls;

/// Counters for cache traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    /// Backend or decode failures that were absorbed
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

/// Typed cache over a [`CacheBackend`].
///
/// Values are stored as JSON. Nothing here ever fails the caller: backend
/// errors and undecodable entries are logged and read as a miss, failed
/// writes are logged and dropped.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    ttls: CacheTtls,
    counters: Arc<Counters>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, ttls: CacheTtls) -> Self {
        Self {
            backend,
            ttls,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Store on a fresh process-local backend.
    pub fn in_memory(ttls: CacheTtls) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), ttls)
    }

    /// Connect to Redis at `url`, or fall back to memory if that fails.
    #[cfg(feature = "redis-cache")]
    pub async fn connect(url: &str, ttls: CacheTtls) -> Self {
        match super::backend::RedisBackend::connect(url).await {
            Ok(backend) => {
                tracing::info!("cache connected to redis");
                Self::new(Arc::new(backend), ttls)
            }
            Err(e) => {
                warn!(error = %e, "redis unavailable, using in-memory cache");
                Self::in_memory(ttls)
            }
        }
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cached value could not be decoded");
                None
            }
        }
    }

    /// Write `value` under `key`. `None` uses the default TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "value could not be encoded for cache");
                return false;
            }
        };

        let ttl = ttl.unwrap_or(self.ttls.default);
        match self.backend.set(key.as_str(), &raw, ttl).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache write failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        match self.backend.delete(key.as_str()).await {
            Ok(removed) => {
                self.counters.deletes.fetch_add(1, Ordering::Relaxed);
                removed
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Remove every key starting with `prefix`. Returns the count removed.
    pub async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        match self.backend.delete_by_prefix(prefix).await {
            Ok(removed) => {
                self.counters.deletes.fetch_add(removed, Ordering::Relaxed);
                debug!(prefix, removed, "cache prefix invalidated");
                removed
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(prefix, error = %e, "cache prefix delete failed");
                0
            }
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        match self.backend.get(key.as_str()).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cache exists check failed");
                false
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}
