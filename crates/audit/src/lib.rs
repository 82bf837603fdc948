//! Per-query audit trail: one record accretes fields as the query moves
//! through the pipeline, then serializes to exactly one JSON line. A single
//! appending writer per process owns the file handle; files rotate on size
//! or UTC date change.

pub mod summary;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use summary::{AuditSummary, summarize};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Compact view of a retrieved chunk as recorded in the audit line. The full
/// chunk text stays out of the log; the chunk id is enough to recover it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditChunk {
    pub chunk_id: String,
    pub laureate: String,
    pub year_awarded: u32,
    pub score: f32,
}

/// Complete audit record for one query. Created when the query enters the
/// engine, mutated only through the stage setters below, written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAudit {
    // Basic query info
    pub query_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub source: String,
    pub environment: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    // Intent and routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_terms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoped_entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_trace: Option<Vec<String>>,

    // Thematic subtype
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thematic_subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype_cues: Option<Vec<String>>,

    // Keyword expansion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded_terms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_similarities: Option<std::collections::BTreeMap<String, f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_method: Option<String>,

    // Retrieval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters_applied: Option<std::collections::BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_retrieved: Option<Vec<AuditChunk>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_scores: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,

    // Prompt construction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<usize>,

    // LLM interaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,

    // Final result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_used: Option<Vec<AuditChunk>>,

    // Performance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_processing_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_time_ms: Option<f64>,

    // Errors
    pub error_occurred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl QueryAudit {
    pub fn open(user_query: &str, source: &str, environment: &str) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_query: user_query.to_string(),
            source: source.to_string(),
            environment: environment.to_string(),
            version: "1.0".to_string(),
            model_id: None,
            intent: None,
            confidence: None,
            matched_terms: None,
            scoped_entity: None,
            decision_trace: None,
            thematic_subtype: None,
            subtype_confidence: None,
            subtype_cues: None,
            expanded_terms: None,
            term_similarities: None,
            expansion_method: None,
            retrieval_method: None,
            top_k: None,
            score_threshold: None,
            filters_applied: None,
            chunks_retrieved: None,
            retrieval_scores: None,
            chunk_count: None,
            prompt_template: None,
            prompt_length: None,
            context_length: None,
            llm_model: None,
            llm_temperature: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            estimated_cost_usd: None,
            answer_type: None,
            final_answer: None,
            answer_length: None,
            sources_used: None,
            total_processing_time_ms: None,
            embedding_time_ms: None,
            retrieval_time_ms: None,
            llm_time_ms: None,
            error_occurred: false,
            error_message: None,
            error_type: None,
        }
    }

    pub fn set_intent(
        &mut self,
        intent: &str,
        confidence: f32,
        matched_terms: Vec<String>,
        scoped_entity: Option<String>,
        decision_trace: Vec<String>,
    ) {
        self.intent = Some(intent.to_string());
        self.confidence = Some(confidence);
        self.matched_terms = Some(matched_terms);
        self.scoped_entity = scoped_entity;
        self.decision_trace = Some(decision_trace);
    }

    pub fn set_subtype(&mut self, subtype: &str, confidence: f32, cues: Vec<String>) {
        self.thematic_subtype = Some(subtype.to_string());
        self.subtype_confidence = Some(confidence);
        self.subtype_cues = Some(cues);
    }

    pub fn set_expansion(
        &mut self,
        terms: Vec<String>,
        similarities: std::collections::BTreeMap<String, f32>,
        method: &str,
    ) {
        self.expanded_terms = Some(terms);
        self.term_similarities = Some(similarities);
        self.expansion_method = Some(method.to_string());
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_retrieval(
        &mut self,
        method: &str,
        top_k: usize,
        score_threshold: f32,
        filters: std::collections::BTreeMap<String, String>,
        chunks: Vec<AuditChunk>,
        elapsed_ms: f64,
    ) {
        self.retrieval_method = Some(method.to_string());
        self.top_k = Some(top_k);
        self.score_threshold = Some(score_threshold);
        self.filters_applied = Some(filters);
        self.retrieval_scores = Some(chunks.iter().map(|c| c.score).collect());
        self.chunk_count = Some(chunks.len());
        self.chunks_retrieved = Some(chunks);
        self.retrieval_time_ms = Some(elapsed_ms);
    }

    pub fn set_prompt(&mut self, template: &str, prompt_length: usize, context_length: usize) {
        self.prompt_template = Some(template.to_string());
        self.prompt_length = Some(prompt_length);
        self.context_length = Some(context_length);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_llm(
        &mut self,
        model: &str,
        temperature: f32,
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
        cost_usd: f64,
        elapsed_ms: f64,
    ) {
        self.llm_model = Some(model.to_string());
        self.llm_temperature = Some(temperature);
        self.prompt_tokens = Some(prompt_tokens);
        self.completion_tokens = Some(completion_tokens);
        self.total_tokens = Some(total_tokens);
        self.estimated_cost_usd = Some(cost_usd);
        self.llm_time_ms = Some(elapsed_ms);
    }

    /// Record the final answer. First write wins: a query has exactly one
    /// final answer no matter how many paths try to finalize it.
    pub fn set_final(&mut self, answer_type: &str, answer: &str, sources: Vec<AuditChunk>) {
        if self.final_answer.is_some() {
            return;
        }
        self.answer_type = Some(answer_type.to_string());
        self.final_answer = Some(answer.to_string());
        self.answer_length = Some(answer.chars().count());
        self.sources_used = Some(sources);
    }

    /// Record an error. First write wins: an audit line carries at most one
    /// error type.
    pub fn set_error(&mut self, error_type: &str, message: &str) {
        if self.error_type.is_some() {
            return;
        }
        self.error_occurred = true;
        self.error_type = Some(error_type.to_string());
        self.error_message = Some(message.to_string());
    }

    pub fn set_total_time(&mut self, elapsed_ms: f64) {
        self.total_processing_time_ms = Some(elapsed_ms);
    }

    pub fn set_embedding_time(&mut self, elapsed_ms: f64) {
        self.embedding_time_ms = Some(elapsed_ms);
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

struct WriterState {
    date: NaiveDate,
    seq: u32,
    /// Bytes in the active file; `None` until probed.
    size: Option<u64>,
}

/// Serializes completed audits to `audit_log_YYYY-MM-DD.jsonl` in the log
/// directory. Rotation bumps a numeric suffix when the active file passes
/// the size bound, and resets on UTC date change. All writers in the
/// process share this one handle owner; the mutex makes each line atomic
/// with respect to the others.
pub struct AuditWriter {
    dir: PathBuf,
    max_file_size: u64,
    state: Mutex<WriterState>,
}

impl AuditWriter {
    pub fn new(dir: impl Into<PathBuf>, max_file_mb: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: max_file_mb.saturating_mul(1024 * 1024),
            state: Mutex::new(WriterState {
                date: Utc::now().date_naive(),
                seq: 0,
                size: None,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, date: NaiveDate, seq: u32) -> PathBuf {
        let stem = format!("audit_log_{}", date.format("%Y-%m-%d"));
        if seq == 0 {
            self.dir.join(format!("{stem}.jsonl"))
        } else {
            self.dir.join(format!("{stem}.{seq}.jsonl"))
        }
    }

    /// Append one completed audit as a single JSON line.
    pub async fn write(&self, audit: &QueryAudit) -> Result<(), AuditError> {
        let line = serde_json::to_string(audit)?;
        let mut state = self.state.lock().await;

        let today = Utc::now().date_naive();
        if state.date != today {
            state.date = today;
            state.seq = 0;
            state.size = None;
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        // Probe the active file's size on first use (or after rotation) so
        // restarts continue an existing file rather than clobbering it.
        loop {
            if state.size.is_none() {
                let path = self.file_path(state.date, state.seq);
                state.size = Some(match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta.len(),
                    Err(_) => 0,
                });
            }
            if state.size.unwrap_or(0) > self.max_file_size {
                state.seq += 1;
                state.size = None;
                continue;
            }
            break;
        }

        let path = self.file_path(state.date, state.seq);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        state.size = Some(state.size.unwrap_or(0) + line.len() as u64 + 1);
        tracing::debug!(query_id = %audit.query_id, path = %path.display(), "audit line written");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
