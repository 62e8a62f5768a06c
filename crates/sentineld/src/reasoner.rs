//! Reasoning service backends.
//!
//! The daemon treats the external reasoning service as an opaque text
//! completion endpoint. `HttpReasoningBackend` talks to a messages-style
//! HTTP API; `FakeReasoningBackend` replays canned replies for tests.

use anyhow::Context;
use async_trait::async_trait;
use sentinel_common::ReasonerConfig;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2023-06-01";

/// Reasoning service errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReasonerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("reasoning service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    #[error("invalid response body: {0}")]
    InvalidBody(String),

    #[error("reasoning service returned an empty response")]
    EmptyResponse,
}

/// Text-in, text-out access to the reasoning service
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ReasonerError>;
}

/// Messages API client. TLS certificates are always verified.
pub struct HttpReasoningBackend {
    config: ReasonerConfig,
    api_key: String,
    client: reqwest::Client,
}

impl HttpReasoningBackend {
    pub fn new(config: &ReasonerConfig, api_key: String) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout());

        // Lets the daemon reach the endpoint while name resolution is broken
        if let Some(raw) = &config.resolve_override {
            let addr: SocketAddr = raw
                .parse()
                .with_context(|| format!("Invalid resolve_override '{}'", raw))?;
            let url = reqwest::Url::parse(&config.endpoint)
                .with_context(|| format!("Invalid endpoint '{}'", config.endpoint))?;
            let host = url
                .host_str()
                .context("Endpoint URL has no host")?
                .to_string();
            builder = builder.resolve(&host, addr);
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ReasoningBackend for HttpReasoningBackend {
    async fn complete(&self, prompt: &str) -> Result<String, ReasonerError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasonerError::Timeout(self.config.timeout_secs)
                } else {
                    ReasonerError::Http(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReasonerError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReasonerError::InvalidBody(format!("Failed to parse response: {}", e)))?;

        let text = json
            .get("content")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("text"))
            .and_then(|v| v.as_str())
            .ok_or(ReasonerError::EmptyResponse)?;

        if text.trim().is_empty() {
            return Err(ReasonerError::EmptyResponse);
        }
        debug!("Reasoning service replied with {} chars", text.len());
        Ok(text.to_string())
    }
}

/// Fake backend for testing
pub struct FakeReasoningBackend {
    responses: Mutex<Vec<Result<String, ReasonerError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl FakeReasoningBackend {
    /// Replies are consumed in order; the last one repeats
    pub fn new(responses: Vec<Result<String, ReasonerError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn always_error(error: ReasonerError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Sleep before answering, to keep a call in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every prompt received, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ReasoningBackend for FakeReasoningBackend {
    async fn complete(&self, prompt: &str) -> Result<String, ReasonerError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        match responses.len() {
            0 => Err(ReasonerError::EmptyResponse),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}
