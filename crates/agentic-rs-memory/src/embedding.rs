//! Embedding provider interface and an OpenAI-compatible HTTP implementation.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Settings for [`OpenAiEmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingOptions {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub endpoint: String,
    /// Model name.
    pub model: String,
    /// Bearer token.
    pub api_key: String,
    /// Requested output dimension, when the model supports truncation.
    pub dimensions: Option<usize>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Embedding provider for the `/embeddings` endpoint of OpenAI-compatible APIs.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    options: OpenAiEmbeddingOptions,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    /// Build a provider with its own HTTP client.
    pub fn new(options: OpenAiEmbeddingOptions) -> Result<Self, EmbeddingError> {
        if options.api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured("missing api key".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|err| EmbeddingError::Transport(err.to_string()))?;
        Ok(Self { client, options })
    }

    fn url(&self) -> String {
        format!("{}/embeddings", self.options.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.options.model,
            input: text,
            dimensions: self.options.dimensions,
        };
        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.options.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| EmbeddingError::Transport(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("status {status}: {body}")));
        }
        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Api(err.to_string()))?;
        let embedding = payload
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| EmbeddingError::Api("empty embedding response".to_string()))?;
        debug!(
            "embedded text (model={}, chars={}, dimension={})",
            self.options.model,
            text.chars().count(),
            embedding.len()
        );
        Ok(embedding)
    }
}
