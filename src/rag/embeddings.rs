//! Embedding capability.
//!
//! The embedding model is an external service with an OpenAI-compatible
//! `/v1/embeddings` endpoint. The adapter owns retries for transient faults
//! and guarantees that every returned vector has exactly the configured
//! dimension - a mismatch is an invariant violation, not a soft error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, Result};
use crate::utils::retry::retry_with_backoff;

/// Dense embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Native output dimension of the model.
    fn dimensions(&self) -> usize;

    /// Model identifier, used in embedding cache keys.
    fn model_id(&self) -> &str;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Internal("embedder returned no vector".to_string()))
    }

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ============================================================================
// HTTP embedder (OpenAI-compatible)
// ============================================================================

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
}

impl HttpEmbedder {
    /// Create a client for `{base_url}/embeddings`.
    pub fn new(base_url: String, model: String, api_key: Option<String>, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            dim,
        }
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::AdapterUnavailable {
            adapter: "embedder",
            message: format!("embedding service unreachable: {}", e),
            refund_txn_id: None,
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_s = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(AppError::RateLimited { retry_after_s });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::InvalidInput(format!(
                "embedding service rejected input ({}): {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AdapterUnavailable {
                adapter: "embedder",
                message: format!("embedding service returned {}: {}", status, body),
                refund_txn_id: None,
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| AppError::AdapterUnavailable {
                adapter: "embedder",
                message: format!("malformed embedding response: {}", e),
                refund_txn_id: None,
            })?;

        if parsed.data.len() != texts.len() {
            return Err(AppError::InvariantViolation(format!(
                "embedding service returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        for vector in &vectors {
            if vector.len() != self.dim {
                return Err(AppError::InvariantViolation(format!(
                    "embedding length {} does not match configured dimension {}",
                    vector.len(),
                    self.dim
                )));
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        retry_with_backoff("embed_batch", || self.embed_once(texts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing_preserves_index_order() {
        let raw = r#"{
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
        assert_eq!(parsed.data[1].embedding, vec![0.5, 0.5]);
    }
}
