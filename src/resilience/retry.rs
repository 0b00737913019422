//! Bounded retries with exponential backoff.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Largest backoff exponent; keeps the multiplier from overflowing.
const MAX_SHIFT: u32 = 20;

/// Retries a fallible async operation.
///
/// Every error is a failure signal for its attempt; deciding which failures
/// matter is left to the circuit breaker wrapped around the whole sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: bool,
    deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: false,
            deadline: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay)
            .with_jitter(config.jitter)
            .with_deadline(config.deadline)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Overall budget for the sequence, sleeps included.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the zero-based `attempt_index`-th failure: `base * 2^index`.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let multiplier = 1u32 << attempt_index.min(MAX_SHIFT);
        let delay = self.base_delay.saturating_mul(multiplier);
        if self.jitter && !delay.is_zero() {
            let millis = delay.as_millis().min(u64::MAX as u128) as u64;
            let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
            Duration::from_millis(jittered)
        } else {
            delay
        }
    }

    /// Run `f` until it succeeds or attempts run out.
    ///
    /// Exhaustion, and hitting the deadline mid-sequence, both return
    /// [`Error::RetryExhausted`] carrying the last failure.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0u32;

        let sequence = async {
            let mut last_error = None;
            for attempt_index in 0..self.max_attempts {
                attempts += 1;
                match f().await {
                    Ok(value) => {
                        if attempt_index > 0 {
                            debug!(attempts, "call succeeded after retry");
                        }
                        return Ok(value);
                    }
                    Err(e) => {
                        let is_last = attempt_index + 1 == self.max_attempts;
                        if !is_last {
                            let wait = self.backoff(attempt_index);
                            warn!(
                                attempt = attempts,
                                max_attempts = self.max_attempts,
                                wait_ms = wait.as_millis() as u64,
                                error = %e,
                                "attempt failed, retrying"
                            );
                            tokio::time::sleep(wait).await;
                        }
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error.unwrap_or_else(|| Error::Internal("retry ran zero attempts".into())))
        };

        let outcome = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, sequence).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(deadline_ms = deadline.as_millis() as u64, "retry sequence hit deadline");
                    Err(Error::timeout(deadline.as_millis() as u64))
                }
            },
            None => sequence.await,
        };

        outcome.map_err(|last| {
            warn!(attempts, error = %last, "retries exhausted");
            Error::retry_exhausted(attempts, last)
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
