//! Request and response types for the two upstreams.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{content_hash, normalize_content, CacheKey};
use crate::config::CacheTtls;

/// Namespace for computational results.
pub const COMPUTATIONAL_NAMESPACE: &str = "computational";

/// What a generation request is for. Drives cache namespace and TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Tutor,
    Explanation,
    Summary,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tutor => "tutor",
            Self::Explanation => "explanation",
            Self::Summary => "summary",
        }
    }

    /// Cache namespace, e.g. `ai_response:explanation`.
    pub fn cache_namespace(&self) -> String {
        format!("ai_response:{}", self.as_str())
    }

    /// Explanations are static content; tutor replies and summaries are
    /// personalized.
    pub fn ttl(&self, ttls: &CacheTtls) -> Duration {
        match self {
            Self::Explanation => ttls.ai_response,
            Self::Tutor | Self::Summary => ttls.personalized,
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt for the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub prompt: String,
    pub temperature: f64,
}

impl GenerationRequest {
    pub fn new(kind: RequestKind, prompt: impl Into<String>, temperature: f64) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            temperature,
        }
    }

    /// `ai_response:<kind>:<hash>`, keyed on the normalized prompt.
    pub fn cache_key(&self) -> CacheKey {
        let digest = content_hash(&normalize_content(&self.prompt));
        CacheKey::derive(&self.kind.cache_namespace(), &[digest])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
}

/// A query for the computational engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub query: String,
}

impl ComputeRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(COMPUTATIONAL_NAMESPACE, &[normalize_content(&self.query)])
    }
}

/// One titled section of a computational answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub title: String,
    pub texts: Vec<String>,
    pub images: Vec<String>,
}

/// Outcome of a computational query that reached the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResult {
    /// Whether the engine could interpret the query at all
    pub interpreted: bool,
    pub result_text: Option<String>,
    /// Image URIs in pod order
    pub images: Vec<String>,
    /// Step-by-step lines in upstream order
    pub step_by_step: Vec<String>,
    pub pods: Vec<Pod>,
}

impl ComputeResult {
    /// Result for a query the engine could not interpret.
    pub fn uninterpreted() -> Self {
        Self::default()
    }

    /// Has an answer or at least one image.
    pub fn is_usable(&self) -> bool {
        self.interpreted
            && (self
                .result_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
                || !self.images.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_key_ignores_whitespace_noise() {
        let a = GenerationRequest::new(RequestKind::Tutor, "explain  limits\n", 0.7);
        let b = GenerationRequest::new(RequestKind::Tutor, "explain limits", 0.7);
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().as_str().starts_with("ai_response:tutor:"));

        let c = GenerationRequest::new(RequestKind::Explanation, "explain limits", 0.7);
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_compute_key_is_readable_when_short() {
        let req = ComputeRequest::new("2 + 2");
        assert_eq!(req.cache_key().as_str(), "computational:2 + 2");
    }

    #[test]
    fn test_ttl_classes() {
        let ttls = CacheTtls::default();
        assert_eq!(RequestKind::Explanation.ttl(&ttls), ttls.ai_response);
        assert_eq!(RequestKind::Tutor.ttl(&ttls), ttls.personalized);
        assert_eq!(RequestKind::Summary.ttl(&ttls), ttls.personalized);
    }

    #[test]
    fn test_usable_requires_content() {
        assert!(!ComputeResult::uninterpreted().is_usable());

        let empty = ComputeResult {
            interpreted: true,
            result_text: Some("  ".into()),
            ..Default::default()
        };
        assert!(!empty.is_usable());

        let image_only = ComputeResult {
            interpreted: true,
            images: vec!["https://img/1.gif".into()],
            ..Default::default()
        };
        assert!(image_only.is_usable());
    }
}
