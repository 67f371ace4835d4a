//! Embedding provider seam and its HTTP and local implementations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunkers::hashed_embedding;
use crate::error::{ConfigError, ProviderError};
use crate::types::PipelineConfig;

const SERVICE: &str = "embedding";

/// Text to fixed-length vector. Identical input must give identical output,
/// and calls must be safe to retry.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ProviderError::Malformed {
            service: SERVICE,
            message: "empty embedding response".to_string(),
        })
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        dimensions: usize,
    ) -> Result<Self, ConfigError> {
        if base_url.trim().is_empty() {
            return Err(ConfigError::Missing("embedding_api_url"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::invalid("embedding_api_url", e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            dimensions,
        })
    }

    /// Build from config; `None` when no API URL is configured.
    pub fn from_config(config: &PipelineConfig) -> Result<Option<Self>, ConfigError> {
        config
            .embedding_api_url
            .as_deref()
            .map(|url| {
                Self::new(
                    url,
                    config.embedding_api_key.clone(),
                    &config.embedding_model,
                    config.embedding_dimensions,
                )
            })
            .transpose()
    }

    /// Check if the embedding service is reachable.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Embedding request failed");
            return Err(status_error(status, text));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| ProviderError::Malformed {
            service: SERVICE,
            message: e.to_string(),
        })?;
        debug!(inputs = texts.len(), vectors = parsed.data.len(), "Embedded batch");
        order_vectors(parsed.data, texts.len(), self.dimensions)
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { service: SERVICE }
    } else {
        ProviderError::Unavailable {
            service: SERVICE,
            message: err.to_string(),
        }
    }
}

/// 429 and 5xx are transient; other client errors are not.
fn status_error(status: StatusCode, body: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited { service: SERVICE }
    } else if status.is_server_error() {
        ProviderError::Unavailable {
            service: SERVICE,
            message: format!("{status}: {body}"),
        }
    } else {
        ProviderError::Rejected {
            service: SERVICE,
            message: format!("{status}: {body}"),
        }
    }
}

fn order_vectors(
    mut data: Vec<EmbeddingData>,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if data.len() != expected {
        return Err(ProviderError::Malformed {
            service: SERVICE,
            message: format!("expected {expected} vectors, got {}", data.len()),
        });
    }
    data.sort_by_key(|d| d.index);
    if let Some(bad) = data.iter().find(|d| d.embedding.len() != dimensions) {
        return Err(ProviderError::Malformed {
            service: SERVICE,
            message: format!("expected {dimensions} dimensions, got {}", bad.embedding.len()),
        });
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

/// Deterministic local embedder over hashed word buckets.
///
/// Used when no embedding service is configured and in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|t| hashed_embedding(t, self.dimensions))
            .collect())
    }
}
