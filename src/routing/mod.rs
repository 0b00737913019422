//! Request routing between the generator and the computational engine.
//!
//! - [`classify`]: lexical request classification
//! - [`prompts`]: prompt construction for each generator request kind
//! - [`coordinator`]: the per-request routing and merge decision

pub mod classify;
pub mod coordinator;
pub mod prompts;

pub use classify::{QueryClassifier, QueryKind};
pub use coordinator::{ComputationalPayload, Coordinator, HybridResponse, Source};
pub use prompts::{ExplanationStyle, TeachingMode};
