//! Embedding provider abstraction and the Gemini implementation.
//!
//! Defines the [`EmbeddingProvider`] trait used by the corpus builder and
//! the retriever, plus vector utilities for the SQLite index:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for BLOB storage
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The Gemini provider retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::CopilotError;

/// Default endpoint for the Gemini REST API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Trait for embedding providers. The corpus builder embeds batches of
/// chunk texts; the retriever embeds single queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-004"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CopilotError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, CopilotError> {
        let results = self.embed(&[text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| {
            CopilotError::ModelInvocation("empty embedding response".to_string())
        })
    }
}

/// Embedding provider backed by the Gemini `batchEmbedContents` endpoint.
pub struct GeminiEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self, CopilotError> {
        Self::with_base_url(api_key, config, DEFAULT_BASE_URL.to_string())
    }

    /// Point the provider at an alternate endpoint. Used by tests.
    pub fn with_base_url(
        api_key: String,
        config: &EmbeddingConfig,
        base_url: String,
    ) -> Result<Self, CopilotError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CopilotError::ModelInvocation(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn call_batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CopilotError> {
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );

        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                serde_json::json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.http.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            CopilotError::ModelInvocation(format!(
                                "invalid embedding response: {}",
                                e
                            ))
                        })?;
                        return parse_embed_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(CopilotError::ModelInvocation(format!(
                            "embedding API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(CopilotError::ModelInvocation(format!(
                        "embedding API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(CopilotError::ModelInvocation(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            CopilotError::ModelInvocation("embedding failed after retries".to_string())
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CopilotError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call_batch_embed(texts).await
    }
}

/// Parse the `batchEmbedContents` response JSON.
///
/// Extracts the `embeddings[].values` arrays in order.
fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, CopilotError> {
    let data = json
        .get("embeddings")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            CopilotError::ModelInvocation("invalid embedding response: missing embeddings".into())
        })?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let values = item.get("values").and_then(|e| e.as_array()).ok_or_else(|| {
            CopilotError::ModelInvocation("invalid embedding response: missing values".into())
        })?;

        let vec: Vec<f32> = values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes for SQLite storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
