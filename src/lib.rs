//! # tutor-core
//!
//! Resilient orchestration core for a tutoring backend that combines a
//! generative language model with a computational knowledge engine.
//!
//! ## Core Components
//!
//! - **Resilience**: per-dependency circuit breakers and retry with backoff
//! - **Cache**: cache-aside storage with namespaced keys, in-process or Redis
//! - **Upstream**: Gemini and Wolfram|Alpha clients behind guarded adapters
//! - **Routing**: request classification and the hybrid response coordinator
//! - **Conversation**: SQLite session log with a cached mirror of recent context
//! - **Tutor**: the start / message / complete session flow
//!
//! ## Example
//!
//! ```rust,ignore
//! use tutor_core::{CoreConfig, Services};
//!
//! let services = Services::build(CoreConfig::from_env()).await?;
//! let started = services.tutor.start_session(user_id, "Quadratic equations").await?;
//! let reply = services
//!     .tutor
//!     .send_message(started.session.id, "solve x^2+5x+6=0", false)
//!     .await?;
//! println!("[{:?}] {}", reply.response.source(), reply.response.message());
//! ```

pub mod cache;
pub mod config;
pub mod conversation;
pub mod error;
pub mod resilience;
pub mod routing;
pub mod services;
pub mod tutor;
pub mod upstream;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use cache::{CacheBackend, CacheKey, CacheStats, CacheStore, MemoryBackend};
pub use config::{
    BreakerConfig, CacheTtls, ConversationConfig, CoordinatorConfig, CoreConfig, RetryConfig,
    UpstreamConfig,
};
pub use conversation::{
    CompletedSession, ContextMessage, ConversationStore, Message, Role, Session,
    SessionRepository, SessionStatus, SqliteSessionRepository,
};
pub use error::{Error, Result};
pub use resilience::{BreakerSnapshot, CircuitBreaker, CircuitState, RetryPolicy};
pub use routing::{
    ComputationalPayload, Coordinator, ExplanationStyle, HybridResponse, QueryClassifier,
    QueryKind, Source,
};
pub use services::Services;
pub use tutor::{SessionSummary, StartedSession, TutorReply, TutorService};
pub use upstream::{
    ComputeAdapter, ComputeEngine, ComputeRequest, ComputeResult, GeminiClient,
    GenerationRequest, GenerationResponse, Generator, GeneratorAdapter, RequestKind,
    WolframClient,
};
