//! Per-dependency circuit breaker.
//!
//! CLOSED passes calls through and counts consecutive failures. Reaching the
//! threshold trips the breaker to OPEN, where calls are rejected without an
//! upstream attempt until the recovery timeout elapses. The first caller after
//! that moves the breaker to HALF_OPEN and becomes the single trial; its
//! outcome closes or re-opens the breaker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::BreakerConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Decides whether an error counts against the breaker.
pub type FailureClassifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Monotonic time of the failure that opened the breaker
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_failure_time: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker guarding one upstream dependency.
///
/// State lives behind a synchronous mutex that is only held for bookkeeping,
/// never across the guarded call.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    classifier: FailureClassifier,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Breaker that counts every error except input-validation failures.
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            classifier: Arc::new(Error::counts_as_upstream_failure),
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run `f` if the breaker admits it, recording the outcome.
    ///
    /// Rejections return [`Error::CircuitOpen`] without calling `f`.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.admit()?;
        let result = f().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(e) if (self.classifier)(e) => permit.fail(e),
            Err(e) => {
                debug!(
                    dependency = %self.dependency,
                    error = %e,
                    "error not counted against breaker"
                );
                drop(permit);
            }
        }
        result
    }

    /// Current state, without triggering the OPEN to HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Force the breaker back to CLOSED.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::new();
        info!(dependency = %self.dependency, "circuit breaker manually reset");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State is plain bookkeeping and is valid even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Result<Permit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(dependency = %self.dependency, "circuit breaker HALF_OPEN, allowing trial call");
                    Ok(Permit::new(self, true))
                } else {
                    debug!(dependency = %self.dependency, "circuit breaker OPEN, rejecting call");
                    Err(Error::circuit_open(&self.dependency))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!(dependency = %self.dependency, "trial call in flight, rejecting call");
                    Err(Error::circuit_open(&self.dependency))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.trial_in_flight = false;
            info!(dependency = %self.dependency, "circuit breaker CLOSED after successful trial");
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        // Non-trial outcomes that land after a trip carry no information.
    }

    fn on_failure(&self, trial: bool, err: &Error) {
        let mut inner = self.lock();
        let now = Instant::now();

        if trial {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.last_failure_time = Some(Utc::now());
            inner.trial_in_flight = false;
            warn!(dependency = %self.dependency, error = %err, "trial call failed, circuit breaker re-OPENED");
            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }

        inner.consecutive_failures += 1;
        inner.last_failure_time = Some(Utc::now());
        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            error!(
                dependency = %self.dependency,
                failures = inner.consecutive_failures,
                error = %err,
                "circuit breaker OPEN"
            );
        } else {
            warn!(
                dependency = %self.dependency,
                failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                error = %err,
                "upstream call failed"
            );
        }
    }

    /// Give the trial slot back without deciding the outcome.
    fn release_trial(&self) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
    }
}

/// Admission for one call. A trial permit that is dropped undecided (a
/// non-counted error, or the caller's future was cancelled) frees the trial
/// slot and leaves the breaker HALF_OPEN.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    decided: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            decided: false,
        }
    }

    fn succeed(mut self) {
        self.decided = true;
        self.breaker.on_success(self.trial);
    }

    fn fail(mut self, err: &Error) {
        self.decided = true;
        self.breaker.on_failure(self.trial, err);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.decided {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "gemini",
            BreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(Duration::from_secs(recovery_secs)),
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<()> {
        b.call(|| async { Err::<(), _>(Error::upstream("gemini", Some(503), "down")) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32> {
        b.call(|| async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_trips_after_threshold() {
        let b = breaker(3, 60);
        for _ in 0..2 {
            assert!(fail(&b).await.is_err());
            assert_eq!(b.state(), CircuitState::Closed);
        }
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().consecutive_failures, 3);
        assert!(b.snapshot().last_failure_time.is_some());
    }

    #[tokio::test]
    async fn test_open_breaker_makes_no_attempt() {
        let b = breaker(2, 60);
        fail(&b).await.ok();
        fail(&b).await.ok();

        let attempts = AtomicU32::new(0);
        let result = b
            .call(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let b = breaker(3, 60);
        fail(&b).await.ok();
        fail(&b).await.ok();
        assert_eq!(succeed(&b).await.unwrap(), 7);
        fail(&b).await.ok();
        fail(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let b = breaker(1, 30);
        fail(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(succeed(&b).await.unwrap_err().is_breaker_rejection());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, 30);
        fail(&b).await.ok();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(matches!(fail(&b).await, Err(Error::Upstream { .. })));
        assert_eq!(b.state(), CircuitState::Open);

        // The recovery window restarts from the failed trial.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(succeed(&b).await.unwrap_err().is_breaker_rejection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_under_concurrency() {
        let b = Arc::new(breaker(1, 10));
        fail(&b).await.ok();
        tokio::time::advance(Duration::from_secs(10)).await;

        let attempts = Arc::new(AtomicU32::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let trial = {
            let b = Arc::clone(&b);
            let attempts = Arc::clone(&attempts);
            tokio::spawn(async move {
                b.call(|| async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    release_rx.await.ok();
                    Ok(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let mut others = Vec::new();
        for _ in 0..5 {
            let b = Arc::clone(&b);
            let attempts = Arc::clone(&attempts);
            others.push(tokio::spawn(async move {
                b.call(|| async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in others {
            assert!(handle.await.unwrap().unwrap_err().is_breaker_rejection());
        }

        release_tx.send(()).ok();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_count() {
        let b = breaker(1, 60);
        let result = b
            .call(|| async { Err::<(), _>(Error::invalid_request("wolfram", "empty query")) })
            .await;
        assert!(matches!(result, Err(Error::InvalidRequest { .. })));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncounted_trial_error_frees_slot() {
        let b = breaker(1, 5);
        fail(&b).await.ok();
        tokio::time::advance(Duration::from_secs(5)).await;

        let result = b
            .call(|| async { Err::<(), _>(Error::invalid_request("gemini", "bad prompt")) })
            .await;
        assert!(result.is_err());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let b = breaker(1, 60).with_classifier(Arc::new(|e: &Error| {
            matches!(e.root_cause(), Error::Timeout { .. })
        }));
        fail(&b).await.ok();
        assert_eq!(b.state(), CircuitState::Closed);

        b.call(|| async { Err::<(), _>(Error::timeout(30_000)) }).await.ok();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset() {
        let b = breaker(1, 60);
        fail(&b).await.ok();
        b.reset();
        let snap = b.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.last_failure_time, None);
    }
}
