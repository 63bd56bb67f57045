//! Embedding gateway: text in, fixed-length vectors out.
//!
//! The [`Embedder`] trait is the seam between the pipeline and the
//! external embedding service, so tests can inject a deterministic fake.
//! The production implementation, [`OpenAiEmbedder`], calls an
//! OpenAI-compatible `POST /v1/embeddings` endpoint.
//!
//! # Batching and ordering
//!
//! Input texts are split into batches of `batch_size` and embedded batch
//! by batch; the output always has the same order and length as the input.
//! A batch that keeps failing fails the whole call — no item is ever
//! silently dropped. The caller (ingestion) decides whether to skip the
//! enclosing file or abort.
//!
//! # Retry strategy
//!
//! Driven by the injected [`RetryPolicy`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//!
//! # Admission control
//!
//! A semaphore bounds concurrent requests to the external service across
//! all callers sharing one gateway; requests over the limit queue rather
//! than fail.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryPolicy, TryFailure};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const SERVICE: &str = "embedding service";

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality produced by the model.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input, same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| Error::Service {
            service: SERVICE,
            message: "empty embedding response".to_string(),
        })
    }
}

/// Embedding client for OpenAI-compatible APIs.
///
/// Requires the `OPENAI_API_KEY` environment variable. The base URL is
/// configurable for compatible self-hosted endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, policy: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let base = config
            .url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            endpoint: format!("{base}/v1/embeddings"),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            policy,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        })
    }

    async fn request_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, TryFailure> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match resp {
            Ok(r) => r,
            // Network error or timeout — retryable
            Err(e) => return Err(TryFailure::retryable(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            let parsed: EmbeddingsResponse = response
                .json()
                .await
                .map_err(|e| TryFailure::fatal(format!("invalid embeddings response: {e}")))?;
            return self.extract_vectors(parsed, texts.len());
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(TryFailure::retryable(format!(
                "API error {status}: {body_text}"
            )))
        } else {
            Err(TryFailure::fatal(format!("API error {status}: {body_text}")))
        }
    }

    fn extract_vectors(
        &self,
        parsed: EmbeddingsResponse,
        expected: usize,
    ) -> std::result::Result<Vec<Vec<f32>>, TryFailure> {
        if parsed.data.len() != expected {
            return Err(TryFailure::fatal(format!(
                "expected {expected} embeddings, got {}",
                parsed.data.len()
            )));
        }

        // Sort by index so the output matches the input order.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        for datum in &data {
            if datum.embedding.len() != self.dims {
                return Err(TryFailure::fatal(format!(
                    "model returned {} dimensions, {} configured",
                    datum.embedding.len(),
                    self.dims
                )));
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| Error::Service {
                    service: SERVICE,
                    message: "gateway shut down".to_string(),
                })?;

            let vectors =
                with_retry(&self.policy, SERVICE, || self.request_batch(batch)).await?;
            out.extend(vectors);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder_with_dims(dims: usize) -> OpenAiEmbedder {
        OpenAiEmbedder {
            client: reqwest::Client::new(),
            endpoint: "http://localhost/v1/embeddings".to_string(),
            api_key: "test".to_string(),
            model: "test-model".to_string(),
            dims,
            batch_size: 2,
            policy: RetryPolicy::with_retries(0),
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    #[test]
    fn test_extract_vectors_restores_input_order() {
        let parsed = EmbeddingsResponse {
            data: vec![
                EmbeddingDatum {
                    index: 1,
                    embedding: vec![0.0, 1.0],
                },
                EmbeddingDatum {
                    index: 0,
                    embedding: vec![1.0, 0.0],
                },
            ],
        };
        let vectors = embedder_with_dims(2).extract_vectors(parsed, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_extract_vectors_rejects_count_mismatch() {
        let parsed = EmbeddingsResponse {
            data: vec![EmbeddingDatum {
                index: 0,
                embedding: vec![1.0, 0.0],
            }],
        };
        let err = embedder_with_dims(2).extract_vectors(parsed, 2).unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_extract_vectors_rejects_dimension_mismatch() {
        let parsed = EmbeddingsResponse {
            data: vec![EmbeddingDatum {
                index: 0,
                embedding: vec![1.0, 0.0, 0.0],
            }],
        };
        let err = embedder_with_dims(2).extract_vectors(parsed, 1).unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("dimensions"));
    }
}
