//! Embedding clients: the remote embedder service over HTTP and a
//! deterministic in-process fallback for offline and test runs.
//!
//! Every implementation returns L2-normalized vectors of the configured
//! dimension; callers can rely on ‖v‖ ≈ 1.0 within 1e-4.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use laureate_config::EmbedderConfig;

/// Largest batch the embedder service accepts in one call. Requests above
/// this are rejected client-side before any network traffic.
pub const MAX_BATCH: usize = 50;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("invalid embedding request: {0}")]
    Rejected(String),
    #[error("embedder service failed after {attempts} attempts: {message}")]
    Failed { attempts: u32, message: String },
    #[error("embedder returned a malformed response: {0}")]
    InvalidResponse(String),
    #[error("embedder unhealthy: {0}")]
    Unhealthy(String),
}

/// Health report from the embedder service.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedderHealth {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub embedding_dimensions: usize,
    #[serde(default)]
    pub model_name: String,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn health(&self) -> Result<EmbedderHealth, EmbeddingError>;

    /// Amortize the service cold start: health-check plus one throwaway
    /// embedding.
    async fn warmup(&self) -> Result<(), EmbeddingError> {
        let health = self.health().await?;
        if health.status != "healthy" {
            return Err(EmbeddingError::Unhealthy(health.status));
        }
        self.embed("warmup").await?;
        Ok(())
    }
}

// ── Normalization helpers ─────────────────────────────────────────────────────

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Renormalize a vector that drifted outside the 1e-4 unit-norm tolerance.
/// A zero vector cannot be normalized and is an error.
fn ensure_unit_norm(mut vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    let norm = l2_norm(&vector);
    if norm == 0.0 {
        return Err(EmbeddingError::InvalidResponse(
            "zero-magnitude embedding".to_string(),
        ));
    }
    if (norm - 1.0).abs() > 1e-4 {
        tracing::warn!(norm, "embedding was not unit-norm; renormalizing");
        for value in &mut vector {
            *value /= norm;
        }
    }
    Ok(vector)
}

fn check_dimension(vector: &[f32], expected: usize) -> Result<(), EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected} dimensions, got {}",
            vector.len()
        )));
    }
    Ok(())
}

// ── Remote embedder ───────────────────────────────────────────────────────────

/// HTTP client for the embedder service. Transient failures (connect errors
/// and 5xx) are retried with exponential backoff; 4xx responses are terminal.
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Failed {
                attempts: 0,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
        })
    }

    /// POST `body` to `path`, retrying transient failures.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, EmbeddingError> {
        let url = format!("{}{path}", self.base_url);
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                let delay = BACKOFF_BASE_MS * 2u64.pow(attempt - 2);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.client.post(&url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            EmbeddingError::InvalidResponse(e.to_string())
                        });
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.is_server_error() {
                        last_error = format!("{status}: {text}");
                        tracing::warn!(%status, attempt, "embedder 5xx, retrying");
                        continue;
                    }
                    // Client errors (auth, validation) will not improve on retry.
                    return Err(EmbeddingError::Failed {
                        attempts: attempt,
                        message: format!("{status}: {text}"),
                    });
                }
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(error = %error, attempt, "embedder request failed, retrying");
                }
            }
        }

        Err(EmbeddingError::Failed {
            attempts: MAX_ATTEMPTS,
            message: last_error,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::Rejected("empty text".to_string()));
        }
        let body = json!({ "api_key": self.api_key, "text": text });
        let value = self.post_with_retry("/embed", &body).await?;
        let parsed: EmbedResponse = serde_json::from_value(value)
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        check_dimension(&parsed.embedding, self.dimension)?;
        ensure_unit_norm(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::Rejected("empty batch".to_string()));
        }
        if texts.len() > MAX_BATCH {
            return Err(EmbeddingError::Rejected(format!(
                "batch of {} exceeds the {MAX_BATCH}-item limit",
                texts.len()
            )));
        }
        if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::Rejected(format!(
                "empty text at index {index}"
            )));
        }

        let body = json!({ "api_key": self.api_key, "texts": texts });
        let value = self.post_with_retry("/embed_batch", &body).await?;
        let parsed: EmbedBatchResponse = serde_json::from_value(value)
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        parsed
            .embeddings
            .into_iter()
            .map(|vector| {
                check_dimension(&vector, self.dimension)?;
                ensure_unit_norm(vector)
            })
            .collect()
    }

    async fn health(&self) -> Result<EmbedderHealth, EmbeddingError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unhealthy(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))
    }
}

// ── Offline embedder ──────────────────────────────────────────────────────────

/// Deterministic in-process embedder used when no remote service is
/// configured, and throughout the test suite. It hashes word tokens into a
/// fixed-dimension projection and L2-normalizes the result. Same dimension
/// and normalization contract as the remote path; no semantic meaning.
#[derive(Debug, Clone)]
pub struct OfflineEmbedder {
    dimension: usize,
}

impl OfflineEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn project(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::Rejected("empty text".to_string()));
        }
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            // Simple FNV-seeded xorshift stream per token; stable across runs
            // and platforms so tests and cached taxonomy embeddings agree.
            let mut state = fnv1a(token.as_bytes());
            for slot in vector.iter_mut() {
                state = xorshift64(state);
                let unit = (state >> 11) as f32 / (1u64 << 53) as f32;
                *slot += unit * 2.0 - 1.0;
            }
        }
        ensure_unit_norm(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    // Never seed xorshift with zero.
    hash | 1
}

fn xorshift64(mut state: u64) -> u64 {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}

#[async_trait]
impl Embedder for OfflineEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.project(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.len() > MAX_BATCH {
            return Err(EmbeddingError::Rejected(format!(
                "batch of {} exceeds the {MAX_BATCH}-item limit",
                texts.len()
            )));
        }
        texts.iter().map(|text| self.project(text)).collect()
    }

    async fn health(&self) -> Result<EmbedderHealth, EmbeddingError> {
        Ok(EmbedderHealth {
            status: "healthy".to_string(),
            model_loaded: true,
            embedding_dimensions: self.dimension,
            model_name: "offline-projection".to_string(),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
