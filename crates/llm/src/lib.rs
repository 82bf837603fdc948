//! Single-shot completion client with token accounting and a per-model
//! price table. Retries 429s and transient 5xx with jittered backoff; every
//! other failure surfaces immediately.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use laureate_config::LlmConfig;

/// Two attempts total: the original call and at most one retry.
const MAX_ATTEMPTS: u32 = 2;
const BACKOFF_BASE_MS: u64 = 500;

pub const DEFAULT_TEMPERATURE: f32 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed after {attempts} attempts: {message}")]
    Failed { attempts: u32, message: String },
    #[error("provider rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("provider response missing completion text")]
    MissingContent,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
}

/// The completion seam: the engine talks to this, tests script it, and the
/// HTTP client below is the production implementation.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

// ── Price table ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// USD per 1K tokens, keyed by model id. Baked-in rates for the models the
/// service is deployed with; config overrides win over these.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let prices = HashMap::from([
            (
                "gpt-4o".to_string(),
                ModelPrice {
                    input_per_1k: 0.0025,
                    output_per_1k: 0.01,
                },
            ),
            (
                "gpt-4o-mini".to_string(),
                ModelPrice {
                    input_per_1k: 0.00015,
                    output_per_1k: 0.0006,
                },
            ),
            (
                "gpt-3.5-turbo".to_string(),
                ModelPrice {
                    input_per_1k: 0.0005,
                    output_per_1k: 0.0015,
                },
            ),
        ]);
        Self { prices }
    }
}

impl PriceTable {
    /// Default rates with the config's `[llm.prices]` overrides applied.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut table = Self::default();
        for (model, price) in &config.prices {
            table.prices.insert(
                model.clone(),
                ModelPrice {
                    input_per_1k: price.input_per_1k,
                    output_per_1k: price.output_per_1k,
                },
            );
        }
        table
    }

    pub fn cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        match self.prices.get(model) {
            Some(price) => {
                f64::from(prompt_tokens) / 1000.0 * price.input_per_1k
                    + f64::from(completion_tokens) / 1000.0 * price.output_per_1k
            }
            None => {
                tracing::debug!(model, "no price entry; reporting zero cost");
                0.0
            }
        }
    }
}

// ── HTTP client ───────────────────────────────────────────────────────────────

/// OpenAI-style `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    prices: PriceTable,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Failed {
                attempts: 0,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            prices: PriceTable::from_config(config),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn jittered_backoff(attempt: u32) -> Duration {
        let base = BACKOFF_BASE_MS * u64::from(attempt);
        let jitter = rand::thread_rng().gen_range(0..250);
        Duration::from_millis(base + jitter)
    }

    fn parse(&self, model: &str, body: serde_json::Value) -> Result<Completion, LlmError> {
        let text = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or(LlmError::MissingContent)?
            .to_string();

        let usage: Usage = body
            .get("usage")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .ok()
            .flatten()
            .unwrap_or(Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            });

        let total_tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };

        Ok(Completion {
            text,
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens,
            cost_usd: self
                .prices
                .cost(model, usage.prompt_tokens, usage.completion_tokens),
        })
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
        });

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(Self::jittered_backoff(attempt - 1)).await;
            }

            match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: serde_json::Value =
                            response.json().await.map_err(|e| LlmError::Failed {
                                attempts: attempt,
                                message: e.to_string(),
                            })?;
                        return self.parse(&request.model, body);
                    }

                    let text = response.text().await.unwrap_or_default();
                    // 429 and transient 5xx are worth one more try; other
                    // statuses (auth, bad request) are terminal.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_error = format!("{status}: {text}");
                        tracing::warn!(%status, attempt, "completion retryable failure");
                        continue;
                    }
                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        message: text,
                    });
                }
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(error = %error, attempt, "completion request failed");
                }
            }
        }

        Err(LlmError::Failed {
            attempts: MAX_ATTEMPTS,
            message: last_error,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use laureate_config::PriceOverride;

    #[test]
    fn cost_uses_the_price_table() {
        let table = PriceTable::default();
        let cost = table.cost("gpt-4o-mini", 2000, 1000);
        // 2.0 × 0.00015 + 1.0 × 0.0006
        assert!((cost - 0.0009).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let table = PriceTable::default();
        assert_eq!(table.cost("mystery-model", 1000, 1000), 0.0);
    }

    #[test]
    fn config_overrides_replace_default_prices() {
        let mut config = LlmConfig::default();
        config.prices.insert(
            "gpt-4o-mini".to_string(),
            PriceOverride {
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            },
        );
        let table = PriceTable::from_config(&config);
        let cost = table.cost("gpt-4o-mini", 1000, 1000);
        assert!((cost - 0.003).abs() < 1e-9);
    }

    #[test]
    fn parse_extracts_text_and_usage() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        let body = json!({
            "choices": [{ "message": { "content": "Justice recurs." }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        });
        let completion = client.parse("gpt-4o-mini", body).unwrap();
        assert_eq!(completion.text, "Justice recurs.");
        assert_eq!(completion.prompt_tokens, 120);
        assert_eq!(completion.completion_tokens, 30);
        assert_eq!(completion.total_tokens, 150);
        assert!(completion.cost_usd > 0.0);
    }

    #[test]
    fn parse_tolerates_missing_usage() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        let body = json!({
            "choices": [{ "message": { "content": "Hello" } }]
        });
        let completion = client.parse("gpt-4o-mini", body).unwrap();
        assert_eq!(completion.total_tokens, 0);
        assert_eq!(completion.cost_usd, 0.0);
    }

    #[test]
    fn parse_without_content_is_an_error() {
        let client = LlmClient::new(&LlmConfig::default()).unwrap();
        let body = json!({ "choices": [] });
        assert!(matches!(
            client.parse("gpt-4o-mini", body),
            Err(LlmError::MissingContent)
        ));
    }
}
