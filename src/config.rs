//! Environment-driven configuration.
//!
//! Every tunable of the core (breaker thresholds, retry budgets, TTL classes,
//! upstream endpoints and credentials) is supplied from outside. Defaults mirror
//! the production values; credentials have no default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|s| s != "0" && s.to_lowercase() != "false")
        .unwrap_or(default)
}

/// Circuit breaker settings for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker trips
    pub failure_threshold: u32,
    /// How long an open breaker waits before allowing a trial call
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", defaults.failure_threshold)
                .max(1),
            recovery_timeout: Duration::from_secs(env_parse(
                "BREAKER_RECOVERY_TIMEOUT_SECS",
                defaults.recovery_timeout.as_secs(),
            )),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Retry settings shared by every outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles each time after
    pub base_delay: Duration,
    /// Randomize each wait within [delay/2, delay]
    pub jitter: bool,
    /// Overall budget for one retry sequence
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            jitter: false,
            deadline: Some(Duration::from_secs(90)),
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let deadline_secs: u64 = env_parse("REQUEST_DEADLINE_SECS", 90);
        Self {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 1000)),
            jitter: env_flag("RETRY_JITTER", defaults.jitter),
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
        }
    }
}

/// Time-to-live classes for cached content.
///
/// Static explanatory content lives longer than personalized content since
/// it changes less often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheTtls {
    pub default: Duration,
    /// Explanations, quizzes
    pub ai_response: Duration,
    /// Tutor replies, summaries
    pub personalized: Duration,
    pub computational: Duration,
    /// Mirrored session message list
    pub session: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(3600),
            ai_response: Duration::from_secs(7200),
            personalized: Duration::from_secs(900),
            computational: Duration::from_secs(3600),
            session: Duration::from_secs(86_400),
        }
    }
}

impl CacheTtls {
    /// Longest lifetime accepted for any cached entry.
    pub const MAX_TTL: Duration = Duration::from_secs(365 * 86_400);

    /// Every TTL must be non-zero and at most [`Self::MAX_TTL`].
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("default", self.default),
            ("ai_response", self.ai_response),
            ("personalized", self.personalized),
            ("computational", self.computational),
            ("session", self.session),
        ];
        for (name, ttl) in named {
            if ttl.is_zero() || ttl > Self::MAX_TTL {
                return Err(Error::Config(format!(
                    "ttls.{} must be between 1s and {}s, got {}s",
                    name,
                    Self::MAX_TTL.as_secs(),
                    ttl.as_secs()
                )));
            }
        }
        Ok(())
    }

    pub fn from_env() -> Self {
        let d = Self::default();
        let secs = |name: &str, fallback: Duration| {
            Duration::from_secs(env_parse(name, fallback.as_secs()))
        };
        Self {
            default: secs("CACHE_TTL_DEFAULT_SECS", d.default),
            ai_response: secs("CACHE_TTL_AI_RESPONSE_SECS", d.ai_response),
            personalized: secs("CACHE_TTL_PERSONALIZED_SECS", d.personalized),
            computational: secs("CACHE_TTL_COMPUTATIONAL_SECS", d.computational),
            session: secs("CACHE_TTL_SESSION_SECS", d.session),
        }
    }
}

/// Endpoint and credential for one HTTP upstream.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub connect_timeout: Duration,
    /// Total per-request timeout, independent of retry backoff
    pub timeout: Duration,
}

// Keep the credential out of logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: None,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, total: Duration) -> Self {
        self.connect_timeout = connect;
        self.timeout = total;
        self
    }

    fn from_env_with(key_var: &str, url_var: &str, model_var: Option<&str>) -> Option<Self> {
        let api_key = env_string(key_var)?;
        let mut config = Self::new(api_key).with_timeouts(
            Duration::from_secs(env_parse("UPSTREAM_CONNECT_TIMEOUT_SECS", 5)),
            Duration::from_secs(env_parse("UPSTREAM_TIMEOUT_SECS", 30)),
        );
        config.base_url = env_string(url_var);
        config.model = model_var.and_then(env_string);
        Some(config)
    }
}

/// Conversation store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Messages of context handed to the coordinator
    pub context_max_messages: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("tutor.db"),
            context_max_messages: 20,
        }
    }
}

/// Routing/merge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Images carried into a merged response
    pub max_images: usize,
    pub tutor_temperature: f64,
    pub explanation_temperature: f64,
    pub summary_temperature: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_images: 2,
            tutor_temperature: 0.7,
            explanation_temperature: 0.7,
            summary_temperature: 0.6,
        }
    }
}

/// Top-level configuration for the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub generator: Option<UpstreamConfig>,
    pub computational: Option<UpstreamConfig>,
    pub generator_breaker: BreakerConfig,
    pub computational_breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub ttls: CacheTtls,
    /// Shared cache URI; in-process cache when unset
    pub redis_url: Option<String>,
    pub conversation: ConversationConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            generator: None,
            computational: None,
            generator_breaker: BreakerConfig::default(),
            computational_breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            ttls: CacheTtls::default(),
            redis_url: None,
            conversation: ConversationConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let breaker = BreakerConfig::from_env();
        Self {
            generator: UpstreamConfig::from_env_with(
                "GEMINI_API_KEY",
                "GEMINI_BASE_URL",
                Some("GEMINI_MODEL"),
            ),
            computational: UpstreamConfig::from_env_with("WOLFRAM_APP_ID", "WOLFRAM_BASE_URL", None),
            generator_breaker: breaker.clone(),
            computational_breaker: breaker,
            retry: RetryConfig::from_env(),
            ttls: CacheTtls::from_env(),
            redis_url: env_string("REDIS_URL"),
            conversation: ConversationConfig {
                database_path: env_string("DATABASE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| ConversationConfig::default().database_path),
                context_max_messages: env_parse("CONTEXT_MAX_MESSAGES", 20),
            },
            coordinator: CoordinatorConfig::default(),
        }
    }

    pub fn with_generator(mut self, config: UpstreamConfig) -> Self {
        self.generator = Some(config);
        self
    }

    pub fn with_computational(mut self, config: UpstreamConfig) -> Self {
        self.computational = Some(config);
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.conversation.database_path = path.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check that both upstream credentials are present and the cache
    /// lifetimes are usable.
    pub fn validate(&self) -> Result<()> {
        if self.generator.is_none() {
            return Err(Error::Config(
                "GEMINI_API_KEY not found in environment variables".to_string(),
            ));
        }
        if self.computational.is_none() {
            return Err(Error::Config(
                "WOLFRAM_APP_ID not found in environment variables".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        self.ttls.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_values() {
        let config = CoreConfig::default();
        assert_eq!(config.generator_breaker.failure_threshold, 5);
        assert_eq!(config.generator_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.ttls.session, Duration::from_secs(86_400));
        assert_eq!(config.ttls.personalized, Duration::from_secs(900));
        assert_eq!(config.conversation.context_max_messages, 20);
        assert_eq!(config.coordinator.max_images, 2);
    }

    #[test]
    fn test_validate_requires_credentials() {
        let config = CoreConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = CoreConfig::default()
            .with_generator(UpstreamConfig::new("g-key"))
            .with_computational(UpstreamConfig::new("w-key"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_ttls() {
        let mut config = CoreConfig::default()
            .with_generator(UpstreamConfig::new("g-key"))
            .with_computational(UpstreamConfig::new("w-key"));
        config.ttls.session = Duration::from_secs(u64::MAX);
        match config.validate() {
            Err(Error::Config(message)) => assert!(message.contains("ttls.session")),
            other => panic!("expected config error, got {:?}", other),
        }

        config.ttls.session = CacheTtls::MAX_TTL;
        config.ttls.personalized = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.ttls.personalized = Duration::from_secs(900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upstream_debug_redacts_key() {
        let config = UpstreamConfig::new("super-secret").with_model("gemini-2.0-flash");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("gemini-2.0-flash"));
    }

    #[test]
    fn test_breaker_threshold_floor() {
        let config = BreakerConfig::default().with_failure_threshold(0);
        assert_eq!(config.failure_threshold, 1);
    }
}
