//! Upstream services: raw clients and their guarded adapters.
//!
//! Raw clients ([`GeminiClient`], [`WolframClient`]) make exactly one HTTP
//! round trip per call and map failures onto the crate error taxonomy. The
//! adapters add caching, retries and a circuit breaker on top.

pub mod adapter;
pub mod computational;
pub mod generator;
pub mod types;

pub use adapter::{ComputeAdapter, GeneratorAdapter, GuardedCall};
pub use computational::{ComputeEngine, WolframClient};
pub use generator::{GeminiClient, Generator};
pub use types::{
    ComputeRequest, ComputeResult, GenerationRequest, GenerationResponse, Pod, RequestKind,
};

use reqwest::Client;

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};

/// HTTP client with bounded connect and total timeouts.
fn build_http_client(config: &UpstreamConfig) -> Result<Client> {
    let builder = || {
        Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
    };

    // Proxy auto-detection can fail in sandboxed environments; retry without it.
    match builder().build() {
        Ok(client) => Ok(client),
        Err(_) => builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e))),
    }
}

fn transport_error(service: &str, config: &UpstreamConfig, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(config.timeout.as_millis() as u64)
    } else {
        // Strip the URL: it carries the credential as a query parameter.
        Error::upstream(service, None, err.without_url().to_string())
    }
}
