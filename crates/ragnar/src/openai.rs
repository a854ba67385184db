//! Embedding and generation collaborators.
//!
//! The pipeline only sees the [`EmbeddingProvider`] and [`GenerationProvider`]
//! traits, so tests can swap in fakes. [`OpenAiClient`] implements both against
//! any OpenAI-compatible HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RagError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRequest {
  pub model: String,
  pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: &str) -> Self {
    Self { role: "system".to_string(), content: content.to_string() }
  }

  pub fn user(content: &str) -> Self {
    Self { role: "user".to_string(), content: content.to_string() }
  }
}

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
  pub max_tokens: u32,
  pub temperature: f32,
  pub top_p: f32,
  pub n: u32,
  pub stream: bool,
}

impl Default for SamplingParams {
  fn default() -> Self {
    Self { max_tokens: 100, temperature: 0.0, top_p: 1.0, n: 1, stream: false }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
  pub model: String,
  pub messages: Vec<ChatMessage>,
  #[serde(flatten)]
  pub sampling: SamplingParams,
}

impl GenerationRequest {
  /// The user turn, which carries the assembled prompt
  pub fn prompt(&self) -> &str {
    self
      .messages
      .iter()
      .rev()
      .find(|m| m.role == "user")
      .map(|m| m.content.as_str())
      .unwrap_or_default()
  }
}

/// Maps text to a vector. Errors surface as `EmbeddingService`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  async fn embed(&self, request: &EmbeddingRequest) -> Result<Vec<f32>>;
}

/// Maps a conversation to generated text. Errors surface as `GenerationService`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
  async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
  embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessage,
}

/// Configuration for the OpenAI HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub base_url: String,
  pub api_key: String,
  /// Transport-level ceiling; the pipeline applies its own per-stage timeout
  pub timeout: Duration,
}

impl ClientConfig {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      api_key: api_key.into(),
      timeout: Duration::from_secs(60),
    }
  }
}

/// HTTP client for the OpenAI embeddings and chat completions endpoints
pub struct OpenAiClient {
  http: Client,
  base_url: String,
  api_key: String,
}

impl OpenAiClient {
  pub fn new(config: ClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| RagError::config(format!("Failed to create HTTP client: {e}")))?;

    let base_url = config.base_url.trim_end_matches('/').to_string();
    Ok(Self { http, base_url, api_key: config.api_key })
  }

  fn url(&self, endpoint: &str) -> String {
    format!("{}/{}", self.base_url, endpoint)
  }

  async fn post<B: Serialize + ?Sized>(
    &self,
    endpoint: &str,
    body: &B,
  ) -> std::result::Result<reqwest::Response, String> {
    let response = self
      .http
      .post(self.url(endpoint))
      .bearer_auth(&self.api_key)
      .json(body)
      .send()
      .await
      .map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      return Err(format!("HTTP {status}: {body}"));
    }

    Ok(response)
  }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
  async fn embed(&self, request: &EmbeddingRequest) -> Result<Vec<f32>> {
    let fail = |message: String| RagError::embedding_service(&request.input, message);

    let response = self.post("embeddings", request).await.map_err(fail)?;
    let parsed: EmbeddingResponse =
      response.json().await.map_err(|e| fail(format!("invalid response: {e}")))?;

    let datum = parsed
      .data
      .into_iter()
      .next()
      .ok_or_else(|| fail("response contained no embeddings".to_string()))?;
    tracing::debug!(
      "Received {}-dimensional embedding from {}",
      datum.embedding.len(),
      request.model
    );
    Ok(datum.embedding)
  }
}

#[async_trait]
impl GenerationProvider for OpenAiClient {
  async fn generate(&self, request: &GenerationRequest) -> Result<String> {
    let fail = |message: String| RagError::generation_service(request.prompt(), message);

    let response = self.post("chat/completions", request).await.map_err(fail)?;
    let parsed: ChatResponse =
      response.json().await.map_err(|e| fail(format!("invalid response: {e}")))?;

    parsed
      .choices
      .into_iter()
      .next()
      .map(|choice| choice.message.content)
      .ok_or_else(|| fail("response contained no choices".to_string()))
  }
}
