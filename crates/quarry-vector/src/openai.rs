//! OpenAI-compatible embedding client.
//!
//! Calls the `/embeddings` endpoint of OpenAI, Azure OpenAI, or any server
//! that speaks the same protocol, and reports the token usage returned with
//! each response.
//!
//! # Addressing
//!
//! | Mode | URL | Auth header |
//! |------|-----|-------------|
//! | OpenAI | `{base_url}/embeddings` | `Authorization: Bearer <key>` |
//! | Azure | `{base_url}/openai/deployments/{model}/embeddings?api-version=V` | `api-key: <key>` |
//!
//! # Feature Gate
//!
//! This module requires the `embedding-openai` feature.

use async_trait::async_trait;
use quarry_core::config::EmbeddingConfig;
use quarry_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::embedding::{Embedder, EmbeddingOutput, TokenUsage};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Azure API version used when none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-05-15";

/// Embedder calling an OpenAI-compatible HTTP API.
pub struct OpenAiEmbedder {
    api_key: String,
    model: String,
    base_url: String,
    by_azure: bool,
    api_version: String,
    dimensions: Option<usize>,
    user: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl OpenAiEmbedder {
    /// Creates an embedder for `model` on the public OpenAI API.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            by_azure: false,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            dimensions: None,
            user: None,
            client: reqwest::Client::new(),
        }
    }

    /// Creates an embedder from the `[embedding]` configuration section.
    ///
    /// The API key comes from the configuration, falling back to the
    /// `OPENAI_API_KEY` environment variable.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| Error::config("embedding.api_key is not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        let mut embedder = Self::new(api_key, config.model.clone());
        embedder.client = client;
        embedder.by_azure = config.by_azure;
        embedder.dimensions = config.dimensions;
        embedder.user = config.user.clone();
        if let Some(base_url) = &config.base_url {
            embedder.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(version) = &config.api_version {
            embedder.api_version = version.clone();
        }
        Ok(embedder)
    }

    /// Send requests to `base_url` instead of the public API.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use Azure OpenAI addressing with the given API version.
    pub fn with_azure(mut self, api_version: impl Into<String>) -> Self {
        self.by_azure = true;
        self.api_version = api_version.into();
        self
    }

    /// Ask the model for vectors of `dimensions` components.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Forward an end-user identifier to the provider.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    fn endpoint(&self) -> String {
        if self.by_azure {
            format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                self.base_url, self.model, self.api_version
            )
        } else {
            format!("{}/embeddings", self.base_url)
        }
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "input": texts,
            "model": self.model,
            "encoding_format": "float",
        });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = serde_json::json!(dimensions);
        }
        if let Some(user) = &self.user {
            body["user"] = serde_json::json!(user);
        }
        body
    }
}

/// Turn a response body into vectors in input order.
fn parse_response(body: &str, expected: usize) -> Result<EmbeddingOutput> {
    let mut response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| Error::operation(format!("Failed to parse embedding response: {e}")))?;

    response.data.sort_by_key(|d| d.index);
    if response.data.len() != expected {
        log::warn!(
            "embedding service returned {} vectors for {expected} inputs",
            response.data.len()
        );
    }

    Ok(EmbeddingOutput {
        vectors: response.data.into_iter().map(|d| d.embedding).collect(),
        usage: response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Ok(self.embed_strings_with_usage(texts).await?.vectors)
    }

    async fn embed_strings_with_usage(&self, texts: &[String]) -> Result<EmbeddingOutput> {
        let request = self.client.post(self.endpoint()).json(&self.request_body(texts));
        let request = if self.by_azure {
            request.header("api-key", &self.api_key)
        } else {
            request.bearer_auth(&self.api_key)
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::operation(format!("Failed to call embedding API: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::operation(format!("Failed to read embedding response: {e}")))?;
        if !status.is_success() {
            return Err(Error::operation(format!(
                "Embedding API error {status}: {body}"
            )));
        }

        parse_response(&body, texts.len())
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}
