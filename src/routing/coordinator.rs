//! Routing and merging across the two upstreams.
//!
//! Per request: classify, consult the computational engine when the request
//! calls for it, and have the generator explain (or answer alone). Upstream
//! failures never escape; the only failure visible to the caller is an
//! [`HybridResponse::Error`] carrying a fixed message.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::classify::QueryClassifier;
use super::prompts::{self, ExplanationStyle};
use crate::config::CoordinatorConfig;
use crate::conversation::ContextMessage;
use crate::error::Result;
use crate::resilience::BreakerSnapshot;
use crate::upstream::{
    ComputeAdapter, ComputeRequest, ComputeResult, GenerationRequest, GeneratorAdapter,
    RequestKind,
};

const RESPOND_FAILURE: &str =
    "I apologize, but I'm having trouble processing your request right now. Please try again.";
const EXPLAIN_FAILURE: &str =
    "I apologize, but I'm having trouble generating an explanation right now.";
const COMPUTE_FAILURE: &str =
    "I apologize, but I couldn't compute an answer for that right now. Please try again.";

/// Where a response's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Generator,
    Computational,
    Hybrid,
    Error,
}

/// Computed data carried alongside a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationalPayload {
    pub answer: Option<String>,
    /// Upstream order, unmodified
    pub step_by_step: Vec<String>,
    pub images: Vec<String>,
}

impl ComputationalPayload {
    fn from_result(result: ComputeResult, max_images: usize) -> Self {
        let mut images = result.images;
        images.truncate(max_images);
        Self {
            answer: result.result_text,
            step_by_step: result.step_by_step,
            images,
        }
    }
}

/// One merged response, built once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum HybridResponse {
    Generator {
        message: String,
    },
    Computational {
        message: String,
        computational: ComputationalPayload,
    },
    Hybrid {
        message: String,
        computational: ComputationalPayload,
    },
    Error {
        message: String,
    },
}

impl HybridResponse {
    pub fn message(&self) -> &str {
        match self {
            Self::Generator { message }
            | Self::Computational { message, .. }
            | Self::Hybrid { message, .. }
            | Self::Error { message } => message,
        }
    }

    pub fn source(&self) -> Source {
        match self {
            Self::Generator { .. } => Source::Generator,
            Self::Computational { .. } => Source::Computational,
            Self::Hybrid { .. } => Source::Hybrid,
            Self::Error { .. } => Source::Error,
        }
    }

    pub fn computational(&self) -> Option<&ComputationalPayload> {
        match self {
            Self::Computational { computational, .. } | Self::Hybrid { computational, .. } => {
                Some(computational)
            }
            _ => None,
        }
    }

    pub fn has_computational_data(&self) -> bool {
        self.computational().is_some()
    }

    pub fn computational_answer(&self) -> Option<&str> {
        self.computational().and_then(|c| c.answer.as_deref())
    }

    pub fn step_by_step(&self) -> &[String] {
        self.computational()
            .map(|c| c.step_by_step.as_slice())
            .unwrap_or(&[])
    }

    pub fn images(&self) -> &[String] {
        self.computational()
            .map(|c| c.images.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Decides which upstreams serve a request and merges what they return.
#[derive(Clone)]
pub struct Coordinator {
    generator: GeneratorAdapter,
    compute: ComputeAdapter,
    classifier: QueryClassifier,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(generator: GeneratorAdapter, compute: ComputeAdapter, config: CoordinatorConfig) -> Self {
        Self {
            generator,
            compute,
            classifier: QueryClassifier::new(),
            config,
        }
    }

    pub fn generator(&self) -> &GeneratorAdapter {
        &self.generator
    }

    pub fn compute_adapter(&self) -> &ComputeAdapter {
        &self.compute
    }

    /// Answer a tutoring message given prior `context`.
    ///
    /// `force_computational` consults the engine even for general messages.
    pub async fn respond(
        &self,
        message: &str,
        context: &[ContextMessage],
        topic: Option<&str>,
        force_computational: bool,
    ) -> HybridResponse {
        let kind = self.classifier.classify(message);
        let use_compute = force_computational || kind.needs_computation();
        debug!(%kind, use_compute, "classified request");

        if !use_compute {
            return self.tutor_only(message, context, topic).await;
        }

        let Some(result) = self.usable_computation(message).await else {
            return self.tutor_only(message, context, topic).await;
        };

        let augmented = prompts::augmented_message(
            message,
            result.result_text.as_deref(),
            &result.step_by_step,
        );
        match self.tutor_reply(&augmented, context, topic).await {
            Ok(text) => HybridResponse::Hybrid {
                message: text,
                computational: ComputationalPayload::from_result(result, self.config.max_images),
            },
            Err(e) => {
                warn!(error = %e, "generator failed on hybrid path");
                HybridResponse::Error {
                    message: RESPOND_FAILURE.to_string(),
                }
            }
        }
    }

    /// Explain a concept in the given style, with computed data when the
    /// concept is computational.
    pub async fn explain(
        &self,
        concept: &str,
        style: ExplanationStyle,
        topic: Option<&str>,
    ) -> HybridResponse {
        let computation = if self.classifier.needs_computation(concept) {
            self.usable_computation(concept).await
        } else {
            None
        };

        let (prompt_concept, computation) = match computation {
            Some(result) => (
                prompts::augmented_concept(concept, result.result_text.as_deref()),
                Some(result),
            ),
            None => (concept.to_string(), None),
        };

        let request = GenerationRequest::new(
            RequestKind::Explanation,
            prompts::explanation_prompt(&prompt_concept, style, topic),
            self.config.explanation_temperature,
        );

        match (self.generator.invoke(&request).await, computation) {
            (Ok(response), Some(result)) => HybridResponse::Hybrid {
                message: response.text,
                computational: ComputationalPayload::from_result(result, self.config.max_images),
            },
            (Ok(response), None) => HybridResponse::Generator {
                message: response.text,
            },
            (Err(e), _) => {
                warn!(error = %e, style = style.as_str(), "explanation failed");
                HybridResponse::Error {
                    message: EXPLAIN_FAILURE.to_string(),
                }
            }
        }
    }

    /// Computational answer alone, without a generated explanation.
    pub async fn compute(&self, query: &str) -> HybridResponse {
        match self.usable_computation(query).await {
            Some(result) => HybridResponse::Computational {
                message: result.result_text.clone().unwrap_or_default(),
                computational: ComputationalPayload::from_result(result, self.config.max_images),
            },
            None => HybridResponse::Error {
                message: COMPUTE_FAILURE.to_string(),
            },
        }
    }

    /// Generated summary of a finished session.
    pub async fn summarize(
        &self,
        topic: &str,
        messages: &[ContextMessage],
        duration_minutes: i64,
    ) -> Result<String> {
        let request = GenerationRequest::new(
            RequestKind::Summary,
            prompts::summary_prompt(topic, messages, duration_minutes),
            self.config.summary_temperature,
        );
        Ok(self.generator.invoke(&request).await?.text)
    }

    /// Breaker state of both upstreams.
    pub fn breakers(&self) -> Vec<BreakerSnapshot> {
        vec![self.generator.snapshot(), self.compute.snapshot()]
    }

    /// Engine result if it has usable content; failures and empty results
    /// both read as `None`.
    async fn usable_computation(&self, query: &str) -> Option<ComputeResult> {
        match self.compute.invoke(&ComputeRequest::new(query)).await {
            Ok(result) if result.is_usable() => Some(result),
            Ok(_) => {
                debug!("computational result had no usable content");
                None
            }
            Err(e) if e.is_breaker_rejection() => {
                debug!("computational upstream breaker open");
                None
            }
            Err(e) => {
                info!(error = %e, "computational upstream failed, falling back to generator");
                None
            }
        }
    }

    async fn tutor_reply(
        &self,
        message: &str,
        context: &[ContextMessage],
        topic: Option<&str>,
    ) -> Result<String> {
        let request = GenerationRequest::new(
            RequestKind::Tutor,
            prompts::tutor_prompt(message, context, topic),
            self.config.tutor_temperature,
        );
        Ok(self.generator.invoke(&request).await?.text)
    }

    async fn tutor_only(
        &self,
        message: &str,
        context: &[ContextMessage],
        topic: Option<&str>,
    ) -> HybridResponse {
        match self.tutor_reply(message, context, topic).await {
            Ok(text) => HybridResponse::Generator { message: text },
            Err(e) => {
                warn!(error = %e, "generator failed");
                HybridResponse::Error {
                    message: RESPOND_FAILURE.to_string(),
                }
            }
        }
    }
}
