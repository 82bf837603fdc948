use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Remote embedding service settings.
///
/// When `offline` is true (or no URL is configured) the deterministic
/// in-process embedder is used instead of the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub url: String,
    pub api_key: String,
    pub model_name: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub offline: bool,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            model_name: "BAAI/bge-large-en-v1.5".to_string(),
            dimension: 1024,
            timeout_secs: 10,
            offline: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: String::new(),
            collection: "literature_chunks_bge_large".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Per-model price overrides: model id → (input, output) USD per 1K tokens.
    pub prices: BTreeMap<String, PriceOverride>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PriceOverride {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout_secs: 25,
            prices: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: String,
    pub max_file_mb: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: "logs/audit".to_string(),
            max_file_mb: 100,
        }
    }
}

/// Static data artifacts loaded once at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub laureates_path: String,
    pub taxonomy_path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            laureates_path: "data/nobel_literature.json".to_string(),
            taxonomy_path: "data/theme_taxonomy.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub deadline_ms: u64,
    /// Bound on concurrent per-term vector searches within one query.
    pub fanout: usize,
    pub prompt_token_budget: usize,
    pub expansion_threshold: f32,
    pub expansion_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 30_000,
            fanout: 8,
            prompt_token_budget: 3_000,
            expansion_threshold: 0.35,
            expansion_cap: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub embedder: EmbedderConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub audit: AuditConfig,
    pub data: DataConfig,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            embedder: EmbedderConfig::default(),
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            audit: AuditConfig::default(),
            data: DataConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from a TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error: defaults apply and the environment
    /// still wins, so a container can run on env vars alone.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Apply the recognized environment keys on top of file values.
    ///
    /// Takes a lookup closure rather than reading the process environment
    /// directly so tests can drive it without mutating global state.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let mut set = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key) {
                if !value.is_empty() {
                    *target = value;
                }
            }
        };

        set("EMBEDDER_URL", &mut self.embedder.url);
        set("EMBEDDER_API_KEY", &mut self.embedder.api_key);
        set("VECTOR_STORE_URL", &mut self.store.url);
        set("VECTOR_STORE_API_KEY", &mut self.store.api_key);
        set("LLM_API_KEY", &mut self.llm.api_key);
        set("LLM_MODEL", &mut self.llm.model);
        set("AUDIT_LOG_DIR", &mut self.audit.dir);
        set("ENVIRONMENT", &mut self.environment);

        if let Some(value) = lookup("QUERY_DEADLINE_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                self.engine.deadline_ms = ms;
            }
        }
    }

    pub fn is_prod(&self) -> bool {
        self.environment.eq_ignore_ascii_case("prod")
    }
}
