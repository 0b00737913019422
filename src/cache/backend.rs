//! Raw key-value backends with per-entry expiration.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// A string key-value store with per-entry expiration.
///
/// Backends report failures; the [`CacheStore`](super::CacheStore) facade is
/// what turns them into misses.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`, returning how many went.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct MemoryMap {
    entries: HashMap<String, MemoryEntry>,
    /// When the next write sweeps out expired entries
    next_sweep: Option<Instant>,
}

impl MemoryMap {
    fn sweep(&mut self, now: Instant) {
        self.entries.retain(|_, e| !e.is_expired(now));
        self.next_sweep = Some(far_instant(now, MemoryBackend::SWEEP_INTERVAL));
    }
}

/// `now + ttl`, saturating at a point centuries away instead of overflowing.
fn far_instant(now: Instant, ttl: Duration) -> Instant {
    const CEILING: Duration = Duration::from_secs(100 * 365 * 86_400);
    now.checked_add(ttl.min(CEILING))
        .or_else(|| now.checked_add(CEILING))
        .unwrap_or(now)
}

/// Process-local backend. Expired entries are invisible, dropped on read and
/// swept out by writes at most once per [`MemoryBackend::SWEEP_INTERVAL`].
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<MemoryMap>,
}

impl MemoryBackend {
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let map = self.map.read().await;
        map.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn cleanup(&self) {
        self.map.write().await.sweep(Instant::now());
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let map = self.map.read().await;
            match map.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut map = self.map.write().await;
        if map.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            map.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        match map.next_sweep {
            Some(at) if now >= at => map.sweep(now),
            Some(_) => {}
            None => map.next_sweep = Some(far_instant(now, Self::SWEEP_INTERVAL)),
        }
        map.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: far_instant(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.write().await;
        Ok(map.entries.remove(key).is_some())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        let mut removed = 0;
        map.entries.retain(|k, e| {
            if k.starts_with(prefix) {
                if !e.is_expired(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Shared backend on a Redis server.
#[cfg(feature = "redis-cache")]
pub struct RedisBackend {
    connection_manager: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis-cache")]
impl RedisBackend {
    /// Keys fetched per SCAN round trip.
    const SCAN_BATCH: usize = 200;

    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| Error::Cache(format!("invalid redis url: {}", e)))?;
        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Cache(format!("failed to connect to redis: {}", e)))?;
        Ok(Self { connection_manager })
    }

    fn map_err(e: redis::RedisError) -> Error {
        Error::Cache(e.to_string())
    }
}

#[cfg(feature = "redis-cache")]
#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        use redis::AsyncCommands;
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.get(key).await.map_err(Self::map_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.connection_manager.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        use redis::AsyncCommands;
        let mut conn = self.connection_manager.clone();
        let removed: i64 = conn.del(key).await.map_err(Self::map_err)?;
        Ok(removed > 0)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(Self::SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_err)?;

            if !keys.is_empty() {
                let deleted: i64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(Self::map_err)?;
                removed += deleted.max(0) as u64;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Escape the characters SCAN MATCH treats as glob syntax.
#[cfg(feature = "redis-cache")]
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
