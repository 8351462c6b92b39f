//! Embedding provider interface and OpenAI-compatible HTTP client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, EmbeddingError};
use crate::models::EmbeddingConfig;
use crate::utils::retry::{RetryConfig, with_retry};

/// Token volume and estimated cost consumed by provider calls.
///
/// Usage is an explicit value returned per call and summed by the caller, so
/// concurrent pipeline instances never share mutable counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

impl std::ops::AddAssign for ProviderUsage {
    fn add_assign(&mut self, other: Self) {
        self.total_tokens += other.total_tokens;
        self.total_cost_usd += other.total_cost_usd;
    }
}

/// Vectors for one group of texts, in input order, plus the usage consumed
/// producing them.
#[derive(Debug, Clone)]
pub struct EmbedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub usage: ProviderUsage,
}

/// The embedding collaborator consumed by the pipeline.
///
/// Implementations own their retry policy: a returned error is terminal from
/// the caller's point of view.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a group of texts; the result has the same order and length as
    /// the input.
    async fn embed_many(&self, texts: &[String]) -> Result<EmbedBatch, EmbeddingError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<(Vec<f32>, ProviderUsage), EmbeddingError> {
        let texts = [text.to_string()];
        let batch = self.embed_many(&texts).await?;
        let vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".into()))?;
        Ok((vector, batch.usage))
    }

    /// Length of the vectors this provider produces.
    fn dimension(&self) -> usize;
}

/// Request body for the `/embeddings` endpoint.
#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    total_tokens: u64,
}

/// Cost per one million tokens for known embedding models.
fn cost_per_million_tokens(model: &str) -> f64 {
    match model {
        "text-embedding-3-small" => 0.02,
        "text-embedding-3-large" => 0.13,
        "text-embedding-ada-002" => 0.10,
        _ => 0.02,
    }
}

/// Client for an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    api_key: String,
    retry: RetryConfig,
}

impl OpenAiEmbeddingClient {
    /// Create a client from configuration.
    ///
    /// Missing credentials or an unknown provider name fail here, at
    /// startup, with the offending setting named.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        if config.provider != "openai" {
            return Err(ConfigError::UnknownProvider(config.provider.clone()));
        }

        let api_key = config.resolve_api_key()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::PathError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension as usize,
            api_key,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy (tests use millisecond delays).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One request attempt, without retries.
    async fn request(&self, texts: &[String]) -> Result<EmbedBatch, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ProviderError(format!(
                "status {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The API tags each vector with its input index; order by it rather
        // than trusting response order.
        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        let vectors = data.into_iter().map(|item| item.embedding).collect();

        let tokens = parsed.usage.total_tokens;
        let usage = ProviderUsage {
            total_tokens: tokens,
            total_cost_usd: tokens as f64 * cost_per_million_tokens(&self.model) / 1_000_000.0,
        };

        Ok(EmbedBatch { vectors, usage })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed_many(&self, texts: &[String]) -> Result<EmbedBatch, EmbeddingError> {
        if texts.is_empty() {
            return Ok(EmbedBatch {
                vectors: Vec::new(),
                usage: ProviderUsage::default(),
            });
        }

        with_retry(&self.retry, || self.request(texts))
            .await
            .into_result()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_creation() {
        let client = OpenAiEmbeddingClient::new(&config_with_key()).unwrap();
        assert_eq!(client.model(), "text-embedding-3-small");
        assert_eq!(client.dimension(), 1536);
    }

    #[test]
    fn test_unknown_provider_rejected_at_startup() {
        let config = EmbeddingConfig {
            provider: "cohere".to_string(),
            ..config_with_key()
        };
        match OpenAiEmbeddingClient::new(&config) {
            Err(ConfigError::UnknownProvider(name)) => assert_eq!(name, "cohere"),
            other => panic!("expected UnknownProvider, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_base_url_trimming() {
        let config = EmbeddingConfig {
            url: "https://api.openai.com/v1/".to_string(),
            ..config_with_key()
        };
        let client = OpenAiEmbeddingClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = ProviderUsage::default();
        total += ProviderUsage {
            total_tokens: 1_000,
            total_cost_usd: 0.00002,
        };
        total += ProviderUsage {
            total_tokens: 500,
            total_cost_usd: 0.00001,
        };
        assert_eq!(total.total_tokens, 1_500);
        assert!((total.total_cost_usd - 0.00003).abs() < 1e-12);
    }

    #[test]
    fn test_pricing_table() {
        assert_eq!(cost_per_million_tokens("text-embedding-3-small"), 0.02);
        assert_eq!(cost_per_million_tokens("text-embedding-3-large"), 0.13);
        assert_eq!(cost_per_million_tokens("unknown-model"), 0.02);
    }
}
