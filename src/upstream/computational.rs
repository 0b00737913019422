//! Computational-answer upstream.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::build_http_client;
use super::types::{ComputeRequest, ComputeResult, Pod};
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};

/// A single raw call to a computational engine. No caching, retries or breaker.
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    /// Answer a query. An uninterpretable query is `Ok` with
    /// [`ComputeResult::is_usable`] false, not an error.
    async fn compute(&self, request: &ComputeRequest) -> Result<ComputeResult>;

    fn name(&self) -> &'static str;
}

/// Pod titles that hold the main answer, in priority order of appearance.
const RESULT_TITLES: &[&str] = &["Result", "Solution", "Exact result"];
/// Pods that restate the question rather than answer it.
const INPUT_TITLES: &[&str] = &["input", "input interpretation"];

/// Wolfram|Alpha full results API client.
pub struct WolframClient {
    config: UpstreamConfig,
    http: Client,
}

impl WolframClient {
    const SERVICE: &'static str = "wolfram";
    const DEFAULT_BASE_URL: &'static str = "https://api.wolframalpha.com";

    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = build_http_client(&config)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    /// One round trip. `None` means the engine did not understand the input.
    async fn query_pods(&self, input: &str) -> Result<Option<Vec<Pod>>> {
        let url = format!("{}/v2/query", self.base_url());
        let response = self
            .http
            .get(&url)
            .query(&[
                ("appid", self.config.api_key.as_str()),
                ("input", input),
                ("output", "json"),
                ("format", "plaintext,image"),
            ])
            .send()
            .await
            .map_err(|e| super::transport_error(Self::SERVICE, &self.config, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| super::transport_error(Self::SERVICE, &self.config, e))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), body));
        }

        let envelope: WolframEnvelope = serde_json::from_str(&body)
            .map_err(|e| Error::parse(Self::SERVICE, format!("failed to parse response: {}", e)))?;
        let result = envelope.queryresult;

        if let Some(message) = result.error_message() {
            return Err(if is_quota_message(&message) {
                Error::upstream(Self::SERVICE, None, "API quota limit reached")
            } else {
                Error::upstream(Self::SERVICE, None, message)
            });
        }

        if !result.success {
            return Ok(None);
        }

        Ok(Some(result.pods.into_iter().map(Pod::from).collect()))
    }

    /// Second pass asking for a worked solution. Falls back to the basic
    /// result's pods when the engine offers no step pods.
    async fn step_by_step(&self, problem: &str, basic: &ComputeResult) -> Result<Vec<String>> {
        let query = format!("{} step by step", problem);
        let steps = match self.query_pods(&query).await? {
            Some(pods) => pods
                .into_iter()
                .filter(|p| {
                    let title = p.title.to_lowercase();
                    title.contains("step") || title.contains("solution")
                })
                .flat_map(|p| p.texts)
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };

        if !steps.is_empty() {
            return Ok(steps);
        }
        Ok(steps_from_basic(basic))
    }
}

#[async_trait]
impl ComputeEngine for WolframClient {
    async fn compute(&self, request: &ComputeRequest) -> Result<ComputeResult> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::invalid_request(Self::SERVICE, "empty query"));
        }

        debug!(query_len = query.len(), "calling computational engine");
        let Some(pods) = self.query_pods(query).await? else {
            debug!("computational engine could not interpret the query");
            return Ok(ComputeResult::uninterpreted());
        };

        let mut result = extract_result(pods);

        match self.step_by_step(query, &result).await {
            Ok(steps) => result.step_by_step = steps,
            Err(e) => warn!(error = %e, "step-by-step pass failed, keeping basic result"),
        }

        Ok(result)
    }

    fn name(&self) -> &'static str {
        Self::SERVICE
    }
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("quota") || lower.contains("limit")
}

fn status_error(status: u16, body: String) -> Error {
    if is_quota_message(&body) {
        return Error::upstream(WolframClient::SERVICE, Some(status), "API quota limit reached");
    }
    Error::from_status(WolframClient::SERVICE, status, body)
}

/// Main answer, images and pods from a successful basic query.
fn extract_result(pods: Vec<Pod>) -> ComputeResult {
    let images = pods.iter().flat_map(|p| p.images.iter().cloned()).collect();

    let result_text = pods
        .iter()
        .find(|p| RESULT_TITLES.contains(&p.title.as_str()) && !p.texts.is_empty())
        .or_else(|| pods.get(1).filter(|p| !p.texts.is_empty()))
        .and_then(|p| p.texts.first().cloned());

    ComputeResult {
        interpreted: true,
        result_text,
        images,
        step_by_step: Vec::new(),
        pods,
    }
}

fn steps_from_basic(basic: &ComputeResult) -> Vec<String> {
    let steps: Vec<String> = basic
        .pods
        .iter()
        .filter(|p| !INPUT_TITLES.contains(&p.title.to_lowercase().as_str()))
        .flat_map(|p| p.texts.iter().cloned())
        .collect();

    if steps.is_empty() {
        let answer = basic.result_text.as_deref().unwrap_or("No solution found");
        vec![format!("Solution: {}", answer)]
    } else {
        steps
    }
}

// Wolfram|Alpha JSON types
#[derive(Debug, Deserialize)]
struct WolframEnvelope {
    queryresult: WolframQueryResult,
}

#[derive(Debug, Deserialize)]
struct WolframQueryResult {
    #[serde(default)]
    success: bool,
    /// `false`, or an object with a `msg` field
    #[serde(default)]
    error: serde_json::Value,
    #[serde(default)]
    pods: Vec<WolframPod>,
}

impl WolframQueryResult {
    fn error_message(&self) -> Option<String> {
        match &self.error {
            serde_json::Value::Object(map) => Some(
                map.get("msg")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            ),
            serde_json::Value::Bool(true) => Some("unknown error".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WolframPod {
    #[serde(default)]
    title: String,
    #[serde(default)]
    subpods: Vec<WolframSubpod>,
}

#[derive(Debug, Deserialize)]
struct WolframSubpod {
    #[serde(default)]
    plaintext: Option<String>,
    #[serde(default)]
    img: Option<WolframImage>,
}

#[derive(Debug, Deserialize)]
struct WolframImage {
    #[serde(default)]
    src: String,
}

impl From<WolframPod> for Pod {
    fn from(pod: WolframPod) -> Self {
        let mut texts = Vec::new();
        let mut images = Vec::new();
        for subpod in pod.subpods {
            if let Some(text) = subpod.plaintext.filter(|t| !t.trim().is_empty()) {
                texts.push(text);
            }
            if let Some(img) = subpod.img.filter(|i| !i.src.is_empty()) {
                images.push(img.src);
            }
        }
        Pod {
            title: pod.title,
            texts,
            images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WolframClient {
        WolframClient::new(UpstreamConfig::new("app-123").with_base_url(server.uri())).unwrap()
    }

    fn quadratic_basic() -> serde_json::Value {
        json!({
            "queryresult": {
                "success": true,
                "error": false,
                "pods": [
                    { "title": "Input", "subpods": [{ "plaintext": "solve x^2 + 5 x + 6 = 0" }] },
                    {
                        "title": "Results",
                        "subpods": [
                            { "plaintext": "x = -3", "img": { "src": "https://img/a.gif" } },
                            { "plaintext": "x = -2", "img": { "src": "https://img/b.gif" } }
                        ]
                    },
                    { "title": "Root plot", "subpods": [{ "plaintext": "", "img": { "src": "https://img/c.gif" } }] }
                ]
            }
        })
    }

    async fn mount_input(server: &MockServer, input: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/v2/query"))
            .and(query_param("appid", "app-123"))
            .and(query_param("input", input))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_compute_with_step_pods() {
        let server = MockServer::start().await;
        mount_input(&server, "solve x^2+5x+6=0", quadratic_basic()).await;
        mount_input(
            &server,
            "solve x^2+5x+6=0 step by step",
            json!({
                "queryresult": {
                    "success": true,
                    "pods": [
                        { "title": "Input", "subpods": [{ "plaintext": "ignored" }] },
                        {
                            "title": "Possible intermediate steps",
                            "subpods": [{ "plaintext": "Factor: (x+2)(x+3) = 0" }, { "plaintext": "x = -2 or x = -3" }]
                        }
                    ]
                }
            }),
        )
        .await;

        let result = client(&server)
            .compute(&ComputeRequest::new("solve x^2+5x+6=0"))
            .await
            .unwrap();

        assert!(result.is_usable());
        // No Result/Solution pod, so the second pod supplies the answer.
        assert_eq!(result.result_text.as_deref(), Some("x = -3"));
        assert_eq!(
            result.images,
            vec!["https://img/a.gif", "https://img/b.gif", "https://img/c.gif"]
        );
        assert_eq!(
            result.step_by_step,
            vec!["Factor: (x+2)(x+3) = 0", "x = -2 or x = -3"]
        );
        assert_eq!(result.pods.len(), 3);
    }

    #[tokio::test]
    async fn test_steps_fall_back_to_basic_pods() {
        let server = MockServer::start().await;
        mount_input(
            &server,
            "2+2",
            json!({
                "queryresult": {
                    "success": true,
                    "pods": [
                        { "title": "Input", "subpods": [{ "plaintext": "2 + 2" }] },
                        { "title": "Result", "subpods": [{ "plaintext": "4" }] },
                        { "title": "Number name", "subpods": [{ "plaintext": "four" }] }
                    ]
                }
            }),
        )
        .await;
        mount_input(
            &server,
            "2+2 step by step",
            json!({ "queryresult": { "success": false, "error": false } }),
        )
        .await;

        let result = client(&server).compute(&ComputeRequest::new("2+2")).await.unwrap();
        assert_eq!(result.result_text.as_deref(), Some("4"));
        assert_eq!(result.step_by_step, vec!["4", "four"]);
    }

    #[tokio::test]
    async fn test_step_failure_keeps_basic_result() {
        let server = MockServer::start().await;
        mount_input(&server, "solve x^2+5x+6=0", quadratic_basic()).await;
        Mock::given(method("GET"))
            .and(query_param("input", "solve x^2+5x+6=0 step by step"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client(&server)
            .compute(&ComputeRequest::new("solve x^2+5x+6=0"))
            .await
            .unwrap();
        assert!(result.is_usable());
        assert!(result.step_by_step.is_empty());
    }

    #[tokio::test]
    async fn test_uninterpretable_query_is_not_an_error() {
        let server = MockServer::start().await;
        mount_input(
            &server,
            "colourless green ideas",
            json!({ "queryresult": { "success": false, "error": false, "numpods": 0 } }),
        )
        .await;

        let result = client(&server)
            .compute(&ComputeRequest::new("colourless green ideas"))
            .await
            .unwrap();
        assert!(!result.is_usable());
    }

    #[tokio::test]
    async fn test_quota_and_error_mapping() {
        let server = MockServer::start().await;
        mount_input(
            &server,
            "quota",
            json!({ "queryresult": { "success": false, "error": { "code": "1", "msg": "Monthly quota exceeded" } } }),
        )
        .await;
        Mock::given(method("GET"))
            .and(query_param("input", "forbidden"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Invalid appid"))
            .mount(&server)
            .await;

        let wolfram = client(&server);
        let err = wolfram.compute(&ComputeRequest::new("quota")).await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
        assert!(err.to_string().contains("quota"));

        let err = wolfram.compute(&ComputeRequest::new("forbidden")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_empty_query_rejected_locally() {
        let server = MockServer::start().await;
        let err = client(&server).compute(&ComputeRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn test_extract_prefers_result_pod() {
        let pods = vec![
            Pod { title: "Input".into(), texts: vec!["d/dx x^2".into()], images: vec![] },
            Pod { title: "Plot".into(), texts: vec!["curve".into()], images: vec![] },
            Pod { title: "Result".into(), texts: vec!["2 x".into()], images: vec![] },
        ];
        assert_eq!(extract_result(pods).result_text.as_deref(), Some("2 x"));
    }
}
