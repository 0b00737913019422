//! Failure containment for outbound calls.
//!
//! Composition is explicit: a call site wraps its raw upstream call in
//! `breaker.call(|| retry.execute(...))`, so a retry sequence that exhausts
//! counts as a single breaker failure.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState, FailureClassifier};
pub use retry::RetryPolicy;
