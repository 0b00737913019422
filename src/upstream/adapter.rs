//! Cache-aside, breaker-guarded access to each upstream.
//!
//! Order per call: cache lookup, then `breaker.call(|| retry.execute(raw))`,
//! then write-through on success. A cache hit never touches the breaker.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::computational::ComputeEngine;
use super::generator::Generator;
use super::types::{
    ComputeRequest, ComputeResult, GenerationRequest, GenerationResponse, RequestKind,
    COMPUTATIONAL_NAMESPACE,
};
use crate::cache::{CacheKey, CacheStore};
use crate::resilience::{BreakerSnapshot, CircuitBreaker, RetryPolicy};
use crate::error::Result;

/// The cache + breaker + retry pipeline shared by both adapters.
#[derive(Clone)]
pub struct GuardedCall {
    cache: CacheStore,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl GuardedCall {
    pub fn new(cache: CacheStore, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self {
            cache,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Serve `key` from cache or run `call` under breaker and retry.
    ///
    /// Successful values for which `cacheable` holds are written back with `ttl`.
    pub async fn run<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        cacheable: impl Fn(&T) -> bool,
        call: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.cache.get::<T>(key).await {
            debug!(dependency = self.breaker.dependency(), key = %key, "served from cache");
            return Ok(hit);
        }

        let value = self.breaker.call(|| self.retry.execute(call)).await?;

        if cacheable(&value) {
            self.cache.set(key, &value, Some(ttl)).await;
        }
        Ok(value)
    }
}

/// Guarded access to the text generator.
#[derive(Clone)]
pub struct GeneratorAdapter {
    generator: Arc<dyn Generator>,
    guard: GuardedCall,
}

impl GeneratorAdapter {
    pub fn new(generator: Arc<dyn Generator>, guard: GuardedCall) -> Self {
        Self { generator, guard }
    }

    /// Returns the generated text, or a typed failure
    /// ([`CircuitOpen`](crate::Error::CircuitOpen) or
    /// [`RetryExhausted`](crate::Error::RetryExhausted)).
    pub async fn invoke(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let key = request.cache_key();
        let ttl = request.kind.ttl(self.guard.cache().ttls());
        self.guard
            .run(&key, ttl, |_| true, || self.generator.generate(request))
            .await
    }

    /// Drop every cached response of one kind.
    pub async fn invalidate(&self, kind: RequestKind) -> u64 {
        let prefix = format!("{}:", kind.cache_namespace());
        self.guard.cache().delete_by_prefix(&prefix).await
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.guard.breaker().snapshot()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.guard.breaker()
    }
}

/// Guarded access to the computational engine.
#[derive(Clone)]
pub struct ComputeAdapter {
    engine: Arc<dyn ComputeEngine>,
    guard: GuardedCall,
}

impl ComputeAdapter {
    pub fn new(engine: Arc<dyn ComputeEngine>, guard: GuardedCall) -> Self {
        Self { engine, guard }
    }

    /// Results without usable content are returned but not cached.
    pub async fn invoke(&self, request: &ComputeRequest) -> Result<ComputeResult> {
        let key = request.cache_key();
        let ttl = self.guard.cache().ttls().computational;
        self.guard
            .run(&key, ttl, ComputeResult::is_usable, || self.engine.compute(request))
            .await
    }

    pub async fn invalidate(&self) -> u64 {
        let prefix = format!("{}:", COMPUTATIONAL_NAMESPACE);
        self.guard.cache().delete_by_prefix(&prefix).await
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.guard.breaker().snapshot()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.guard.breaker()
    }
}
