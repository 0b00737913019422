//! Cache-aside storage for upstream responses and session context.
//!
//! - [`key`]: namespaced, bounded-length key derivation
//! - [`backend`]: raw string backends (process memory, Redis)
//! - [`store`]: the typed facade callers use; it never surfaces backend errors

pub mod backend;
pub mod key;
pub mod store;

#[cfg(feature = "redis-cache")]
pub use backend::RedisBackend;
pub use backend::{CacheBackend, MemoryBackend};
pub use key::{content_hash, normalize_content, CacheKey};
pub use store::{CacheStats, CacheStore};
