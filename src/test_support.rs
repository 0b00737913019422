//! Test doubles shared across module tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::CacheBackend;
use crate::error::{Error, Result};
use crate::upstream::{
    ComputeEngine, ComputeRequest, ComputeResult, GenerationRequest, GenerationResponse, Generator,
};

enum Reply {
    Text(String),
    Fail,
}

/// Generator that answers every prompt the same way and records prompts.
pub struct ScriptedGenerator {
    reply: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_reply(Reply::Text(text.into()))
    }

    pub fn failing() -> Self {
        Self::with_reply(Reply::Fail)
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match &self.reply {
            Reply::Text(text) => Ok(GenerationResponse { text: text.clone() }),
            Reply::Fail => Err(Error::upstream("gemini", Some(503), "unavailable")),
        }
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Compute engine with a fixed outcome.
pub struct ScriptedCompute {
    result: Option<ComputeResult>,
    calls: AtomicUsize,
}

impl ScriptedCompute {
    pub fn returning(result: ComputeResult) -> Self {
        Self {
            result: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A usable answer with steps and three images.
    pub fn quadratic() -> Self {
        Self::returning(ComputeResult {
            interpreted: true,
            result_text: Some("x = -3 or x = -2".into()),
            images: vec![
                "https://img/1.gif".into(),
                "https://img/2.gif".into(),
                "https://img/3.gif".into(),
            ],
            step_by_step: vec!["Factor: (x+2)(x+3) = 0".into(), "x = -2 or x = -3".into()],
            pods: Vec::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeEngine for ScriptedCompute {
    async fn compute(&self, _request: &ComputeRequest) -> Result<ComputeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(result) => Ok(result.clone()),
            None => Err(Error::upstream("wolfram", Some(500), "internal error")),
        }
    }

    fn name(&self) -> &'static str {
        "wolfram"
    }
}

/// Cache backend whose every operation fails.
pub struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Cache("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(Error::Cache("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::Cache("connection refused".into()))
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64> {
        Err(Error::Cache("connection refused".into()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
