//! Error types for tutor-core.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using tutor-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the orchestration core.
#[derive(Error, Debug)]
pub enum Error {
    /// Breaker is open; no upstream attempt was made
    #[error("{dependency} is temporarily unavailable due to repeated failures")]
    CircuitOpen { dependency: String },

    /// All retry attempts failed, or the request deadline passed mid-sequence
    #[error("gave up after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Transient upstream failure (transport, 5xx, rate limit)
    #[error("{service} upstream error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
    },

    /// Upstream rejected the request as malformed
    #[error("{service} rejected the request: {message}")]
    InvalidRequest { service: String, message: String },

    /// Upstream payload could not be understood
    #[error("{service} returned an unusable payload: {message}")]
    Parse { service: String, message: String },

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Cache backend error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Durable storage error
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Session {id} is {status}, not active")]
    SessionNotActive { id: Uuid, status: String },

    #[error("Invalid role: {0}. Must be 'user' or 'assistant'")]
    InvalidRole(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a circuit-open rejection.
    pub fn circuit_open(dependency: impl Into<String>) -> Self {
        Self::CircuitOpen {
            dependency: dependency.into(),
        }
    }

    /// Create a retry-exhausted error wrapping the last attempt's failure.
    pub fn retry_exhausted(attempts: u32, last: Error) -> Self {
        Self::RetryExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Create a transient upstream error.
    pub fn upstream(service: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an input-validation error.
    pub fn invalid_request(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a payload parse error.
    pub fn parse(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Map an HTTP status from `service` onto the taxonomy.
    ///
    /// 408, 429 and 5xx are transient; any other 4xx is the caller's fault.
    pub fn from_status(service: &str, status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 429 => Self::upstream(service, Some(status), message),
            400..=499 => Self::invalid_request(service, message),
            _ => Self::upstream(service, Some(status), message),
        }
    }

    /// Innermost error, looking through retry wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this is the breaker's "unavailable" signal.
    pub fn is_breaker_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Default failure classification for circuit breakers.
    ///
    /// Transport, server, timeout and payload failures count; input validation
    /// and rejections from another breaker do not.
    pub fn counts_as_upstream_failure(&self) -> bool {
        !matches!(
            self.root_cause(),
            Self::InvalidRequest { .. } | Self::CircuitOpen { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
