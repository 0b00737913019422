//! Process-wide wiring.
//!
//! Every shared instance (cache, breakers, adapters, coordinator, conversation
//! store) is built once here and handed out explicitly. There are no globals.

use std::sync::Arc;
use tracing::info;

use crate::cache::CacheStore;
use crate::config::CoreConfig;
use crate::conversation::{ConversationStore, SessionRepository, SqliteSessionRepository};
use crate::error::{Error, Result};
use crate::resilience::{BreakerSnapshot, CircuitBreaker, RetryPolicy};
use crate::routing::Coordinator;
use crate::tutor::TutorService;
use crate::upstream::{
    ComputeAdapter, ComputeEngine, GeminiClient, Generator, GeneratorAdapter, GuardedCall,
    WolframClient,
};

/// The shared instances of one process.
#[derive(Clone)]
pub struct Services {
    pub cache: CacheStore,
    pub coordinator: Coordinator,
    pub conversations: ConversationStore,
    pub tutor: Arc<TutorService>,
}

impl Services {
    /// Build everything from configuration.
    ///
    /// Fails on missing credentials or an unopenable database. An unreachable
    /// shared cache is not an error; the in-process cache is used instead.
    pub async fn build(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let generator_config = config
            .generator
            .clone()
            .ok_or_else(|| Error::Config("generator credentials missing".to_string()))?;
        let compute_config = config
            .computational
            .clone()
            .ok_or_else(|| Error::Config("computational credentials missing".to_string()))?;

        let generator: Arc<dyn Generator> = Arc::new(GeminiClient::new(generator_config)?);
        let compute: Arc<dyn ComputeEngine> = Arc::new(WolframClient::new(compute_config)?);
        let repo: Arc<dyn SessionRepository> = Arc::new(SqliteSessionRepository::open(
            &config.conversation.database_path,
        )?);
        let cache = Self::build_cache(&config).await;

        info!(
            cache = cache.backend_name(),
            database = %config.conversation.database_path.display(),
            "services built"
        );
        Ok(Self::from_parts(&config, generator, compute, repo, cache))
    }

    /// Wire pre-built upstreams, repository and cache together.
    pub fn from_parts(
        config: &CoreConfig,
        generator: Arc<dyn Generator>,
        compute: Arc<dyn ComputeEngine>,
        repo: Arc<dyn SessionRepository>,
        cache: CacheStore,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);

        let generator_breaker = Arc::new(CircuitBreaker::new(
            generator.name(),
            config.generator_breaker.clone(),
        ));
        let compute_breaker = Arc::new(CircuitBreaker::new(
            compute.name(),
            config.computational_breaker.clone(),
        ));

        let coordinator = Coordinator::new(
            GeneratorAdapter::new(
                generator,
                GuardedCall::new(cache.clone(), generator_breaker, retry.clone()),
            ),
            ComputeAdapter::new(compute, GuardedCall::new(cache.clone(), compute_breaker, retry)),
            config.coordinator.clone(),
        );
        let conversations = ConversationStore::new(repo, cache.clone());
        let tutor = Arc::new(TutorService::new(
            coordinator.clone(),
            conversations.clone(),
            config.conversation.context_max_messages,
        ));

        Self {
            cache,
            coordinator,
            conversations,
            tutor,
        }
    }

    /// Breaker state of every upstream.
    pub fn breakers(&self) -> Vec<BreakerSnapshot> {
        self.coordinator.breakers()
    }

    async fn build_cache(config: &CoreConfig) -> CacheStore {
        let Some(url) = config.redis_url.as_deref() else {
            return CacheStore::in_memory(config.ttls.clone());
        };

        #[cfg(feature = "redis-cache")]
        {
            CacheStore::connect(url, config.ttls.clone()).await
        }

        #[cfg(not(feature = "redis-cache"))]
        {
            tracing::warn!(url, "redis-cache feature disabled, using in-memory cache");
            CacheStore::in_memory(config.ttls.clone())
        }
    }
}
