//! The query engine: classification → routing → retrieval → prompt → LLM,
//! with a per-query audit trail woven through every stage.
//!
//! A query moves through the states received → classified →
//! {answered from metadata | ambiguous | expanded → retrieved → prompted →
//! completed} → finalized. Every path (success, clarification, no-evidence,
//! hard failure) funnels through one audit write, so each completed query
//! leaves exactly one line in the log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use laureate_audit::{AuditChunk, AuditWriter, QueryAudit};
use laureate_config::AppConfig;
use laureate_embedder::Embedder;
use laureate_intent::{
    Classification, ExpanderConfig, ExpansionMethod, Intent, IntentClassifier, IntentError,
    KeywordExpander, ThematicSubtype, ThemeTaxonomy, detect_subtype,
};
use laureate_llm::{CompletionBackend, CompletionRequest, DEFAULT_TEMPERATURE};
use laureate_metadata::{FactualRegistry, Laureate, MetadataAnswer, NameIndex};
use laureate_prompt::PromptBuilder;
use laureate_retrieval::{
    PlainRetriever, RetrievalError, RetrievalOptions, Retriever, RetrievedChunk, SizingProfile,
    ThematicRetriever,
};
use laureate_store::{ChunkStore, SearchFilters, StoreError};

const CLARIFICATION_ANSWER: &str = "I couldn't tell what you're asking. Try a specific question \
     about a laureate (\"What year did Toni Morrison win?\") or a theme (\"How do laureates talk \
     about exile?\").";

const NO_EVIDENCE_ANSWER: &str = "I couldn't find supporting passages in the lectures and \
     speeches for that question. Try rephrasing it or broadening the theme.";

/// Per-stage timeouts for the suspension points, each additionally capped by
/// the remaining query deadline.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub embedding: Duration,
    pub search: Duration,
    pub llm: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            embedding: Duration::from_secs(10),
            search: Duration::from_secs(10),
            llm: Duration::from_secs(25),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("embedding failure: {0}")]
    Embedding(String),
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("completion failure: {0}")]
    Llm(String),
    #[error("query deadline exceeded during {stage}")]
    Timeout { stage: &'static str },
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Audit taxonomy name for this error.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "InvalidRequest",
            EngineError::InvalidFilter(_) => "InvalidFilter",
            EngineError::Embedding(_) => "EmbeddingFailure",
            EngineError::StoreUnavailable(_) => "StoreUnavailable",
            EngineError::Llm(_) => "LLMFailure",
            EngineError::Timeout { .. } => "Timeout",
            EngineError::Internal(_) => "Internal",
        }
    }

    /// HTTP status for a serving shell to map this error onto.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidRequest(_) | EngineError::InvalidFilter(_) => 400,
            EngineError::Embedding(_) | EngineError::Llm(_) => 502,
            EngineError::StoreUnavailable(_) => 503,
            EngineError::Timeout { .. } => 504,
            EngineError::Internal(_) => 500,
        }
    }

    /// What the user sees. Internal detail stays in the audit log.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::InvalidRequest(reason) | EngineError::InvalidFilter(reason) => {
                format!("The request could not be processed: {reason}")
            }
            EngineError::Timeout { stage } => {
                format!("The query took too long (timed out during {stage}). Please try again.")
            }
            _ => "Something went wrong answering that query. Please try again shortly.".to_string(),
        }
    }
}

impl From<RetrievalError> for EngineError {
    fn from(error: RetrievalError) -> Self {
        match error {
            RetrievalError::Embedding(e) => EngineError::Embedding(e.to_string()),
            RetrievalError::Store(StoreError::InvalidFilter(reason)) => {
                EngineError::InvalidFilter(reason)
            }
            RetrievalError::Store(e) => EngineError::StoreUnavailable(e.to_string()),
        }
    }
}

// ── Request / response ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub model_id: Option<String>,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
    pub filters: BTreeMap<String, String>,
    pub source: String,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            model_id: None,
            top_k: None,
            score_threshold: None,
            filters: BTreeMap::new(),
            source: "api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    Metadata,
    Rag,
    Clarification,
    NoEvidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub laureate: String,
    pub year_awarded: u32,
    pub source_type: String,
    pub text_snippet: String,
    pub score: f32,
    pub chunk_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub answer_type: AnswerType,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_answer: Option<MetadataAnswer>,
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub embedder: String,
    pub store: String,
    pub taxonomy_terms: usize,
    pub laureates: usize,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Shared handles the engine orchestrates. Static data arrives loaded; the
/// engine never mutates it.
pub struct EngineDeps {
    pub laureates: Arc<Vec<Laureate>>,
    pub registry: Arc<FactualRegistry>,
    pub taxonomy: Arc<ThemeTaxonomy>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn ChunkStore>,
    pub llm: Arc<dyn CompletionBackend>,
    pub audit: Arc<AuditWriter>,
}

pub struct QueryEngine {
    laureates: Arc<Vec<Laureate>>,
    registry: Arc<FactualRegistry>,
    classifier: IntentClassifier,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    expander: Arc<KeywordExpander>,
    llm: Arc<dyn CompletionBackend>,
    audit: Arc<AuditWriter>,
    plain: PlainRetriever,
    thematic: ThematicRetriever,
    prompt_builder: PromptBuilder,
    default_model: String,
    environment: String,
    deadline: Duration,
    timeouts: StageTimeouts,
}

impl QueryEngine {
    pub fn new(deps: EngineDeps, config: &AppConfig) -> Self {
        let classifier = IntentClassifier::new(NameIndex::build(&deps.laureates));
        let expander = Arc::new(KeywordExpander::new(
            Arc::clone(&deps.taxonomy),
            ExpanderConfig {
                threshold: config.engine.expansion_threshold,
                cap: config.engine.expansion_cap,
            },
        ));
        let plain = PlainRetriever::new(Arc::clone(&deps.embedder), Arc::clone(&deps.store));
        let thematic = ThematicRetriever::new(
            Arc::clone(&deps.embedder),
            Arc::clone(&deps.store),
            Arc::clone(&expander),
        )
        .with_fanout(config.engine.fanout);

        Self {
            laureates: deps.laureates,
            registry: deps.registry,
            classifier,
            embedder: deps.embedder,
            store: deps.store,
            expander,
            llm: deps.llm,
            audit: deps.audit,
            plain,
            thematic,
            prompt_builder: PromptBuilder::new(config.engine.prompt_token_budget),
            default_model: config.llm.model.clone(),
            environment: config.environment.clone(),
            deadline: Duration::from_millis(config.engine.deadline_ms),
            timeouts: StageTimeouts::default(),
        }
    }

    /// Answer one query. Exactly one audit line is written per call that
    /// passes request validation.
    pub async fn answer(&self, request: QueryRequest) -> Result<QueryResponse, EngineError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(EngineError::InvalidRequest("empty query".to_string()));
        }
        let filters = SearchFilters::from_pairs(
            request.filters.iter().map(|(k, v)| (k.as_str(), v.clone())),
        )
        .map_err(|e| EngineError::InvalidFilter(e.to_string()))?;

        let started = Instant::now();
        let deadline = started + self.deadline;
        let mut audit = QueryAudit::open(&query, &request.source, &self.environment);
        audit.model_id = request.model_id.clone();

        let outcome = self
            .run(&request, &query, filters, &mut audit, deadline)
            .await;

        audit.set_total_time(elapsed_ms(started));
        if let Err(error) = &outcome {
            audit.set_error(error.error_type(), &error.to_string());
            tracing::warn!(query_id = %audit.query_id, error = %error, "query finalized with error");
        }
        if let Err(error) = self.audit.write(&audit).await {
            tracing::error!(%error, "failed to write audit line");
        }
        outcome
    }

    async fn run(
        &self,
        request: &QueryRequest,
        query: &str,
        filters: SearchFilters,
        audit: &mut QueryAudit,
        deadline: Instant,
    ) -> Result<QueryResponse, EngineError> {
        // ── classify ─────────────────────────────────────────────────────
        let classification = match self.classifier.classify(query) {
            Ok(classification) => classification,
            Err(IntentError::Ambiguous(_)) => {
                audit.set_error("AmbiguousIntent", "no intent cue cleared the floor");
                audit.set_final("clarification", CLARIFICATION_ANSWER, vec![]);
                return Ok(QueryResponse {
                    query_id: audit.query_id,
                    answer_type: AnswerType::Clarification,
                    answer: CLARIFICATION_ANSWER.to_string(),
                    metadata_answer: None,
                    sources: vec![],
                    intent: None,
                    trace: vec!["no intent cue cleared the confidence floor".to_string()],
                });
            }
        };
        audit.set_intent(
            intent_slug(classification.intent),
            classification.confidence,
            classification.matched_terms.clone(),
            classification.scoped_entity.clone(),
            classification.trace.clone(),
        );
        tracing::info!(
            query_id = %audit.query_id,
            intent = intent_slug(classification.intent),
            confidence = classification.confidence,
            "query classified"
        );

        // ── metadata first, always ───────────────────────────────────────
        if classification.intent == Intent::Factual {
            if let Some(answer) = self.registry.answer(query, &self.laureates) {
                audit.set_final("metadata", &answer.answer, vec![]);
                return Ok(QueryResponse {
                    query_id: audit.query_id,
                    answer_type: AnswerType::Metadata,
                    answer: answer.answer.clone(),
                    metadata_answer: Some(answer),
                    sources: vec![],
                    intent: Some(Intent::Factual),
                    trace: classification.trace.clone(),
                });
            }
            tracing::debug!(query_id = %audit.query_id, "no factual rule matched; falling back to retrieval");
        }

        // ── retrieval ────────────────────────────────────────────────────
        let filters = self.apply_scoped_entity(filters, &classification);
        let (chunks, subtype, options, method) = match classification.intent {
            Intent::Thematic => {
                let detection = detect_subtype(query);
                audit.set_subtype(
                    subtype_slug(detection.subtype),
                    detection.confidence,
                    detection.cues.clone(),
                );
                let options = resolve_options(
                    SizingProfile::for_subtype(detection.subtype),
                    request,
                    filters,
                );

                // Expansion embeds the query itself; a failure here degrades
                // expansion to surface matching rather than failing the query.
                let embed_started = Instant::now();
                let embedding = match self
                    .stage(
                        "embedding",
                        self.timeouts.embedding,
                        deadline,
                        self.embedder.embed(query),
                    )
                    .await?
                {
                    Ok(vector) => {
                        audit.set_embedding_time(elapsed_ms(embed_started));
                        Some(vector)
                    }
                    Err(error) => {
                        tracing::warn!(%error, "query embedding failed; expansion degrades to surface matching");
                        None
                    }
                };
                let expansion = self.expander.expand(query, embedding.as_deref());
                audit.set_expansion(
                    expansion.terms.clone(),
                    expansion.similarities.clone(),
                    expansion_slug(expansion.method),
                );

                let retrieve_started = Instant::now();
                let chunks = self
                    .stage(
                        "retrieval",
                        self.timeouts.embedding + self.timeouts.search,
                        deadline,
                        self.thematic.retrieve_with_terms(query, &expansion.terms, &options),
                    )
                    .await?
                    .map_err(EngineError::from)?;
                audit.retrieval_time_ms = Some(elapsed_ms(retrieve_started));
                (chunks, Some(detection.subtype), options, "thematic")
            }
            Intent::Generative | Intent::Factual => {
                let profile = if classification.intent == Intent::Factual {
                    SizingProfile::factual_fallback()
                } else {
                    SizingProfile::generative()
                };
                let options = resolve_options(profile, request, filters);

                let retrieve_started = Instant::now();
                let chunks = self
                    .stage(
                        "retrieval",
                        self.timeouts.embedding + self.timeouts.search,
                        deadline,
                        self.plain.retrieve(query, &options),
                    )
                    .await?
                    .map_err(EngineError::from)?;
                audit.retrieval_time_ms = Some(elapsed_ms(retrieve_started));
                (chunks, None, options, "plain")
            }
        };

        let retrieval_ms = audit.retrieval_time_ms.unwrap_or(0.0);
        audit.set_retrieval(
            method,
            options.top_k,
            options.score_threshold,
            options
                .filters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            chunks.iter().map(audit_chunk).collect(),
            retrieval_ms,
        );

        // ── no evidence: answer without the LLM ──────────────────────────
        if chunks.is_empty() {
            audit.set_error("NoEvidence", "retrieval returned zero chunks above threshold");
            audit.set_final("no_evidence", NO_EVIDENCE_ANSWER, vec![]);
            return Ok(QueryResponse {
                query_id: audit.query_id,
                answer_type: AnswerType::NoEvidence,
                answer: NO_EVIDENCE_ANSWER.to_string(),
                metadata_answer: None,
                sources: vec![],
                intent: Some(classification.intent),
                trace: classification.trace.clone(),
            });
        }

        // ── prompt ───────────────────────────────────────────────────────
        let template = laureate_prompt::template_for(classification.intent, subtype);
        let rendered = self.prompt_builder.build(template, query, &chunks);
        audit.set_prompt(
            &rendered.template_name,
            rendered.text.chars().count(),
            rendered.context_char_length,
        );

        // ── complete ─────────────────────────────────────────────────────
        let model = request
            .model_id
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let llm_started = Instant::now();
        let completion = self
            .stage(
                "llm",
                self.timeouts.llm,
                deadline,
                self.llm.complete(CompletionRequest {
                    prompt: rendered.text.clone(),
                    model: model.clone(),
                    temperature: DEFAULT_TEMPERATURE,
                }),
            )
            .await?
            .map_err(|e| EngineError::Llm(e.to_string()))?;
        audit.set_llm(
            &model,
            DEFAULT_TEMPERATURE,
            completion.prompt_tokens,
            completion.completion_tokens,
            completion.total_tokens,
            completion.cost_usd,
            elapsed_ms(llm_started),
        );

        // ── assemble ─────────────────────────────────────────────────────
        let sources: Vec<SourceRef> = chunks.iter().map(source_ref).collect();
        audit.set_final("rag", &completion.text, chunks.iter().map(audit_chunk).collect());
        Ok(QueryResponse {
            query_id: audit.query_id,
            answer_type: AnswerType::Rag,
            answer: completion.text,
            metadata_answer: None,
            sources,
            intent: Some(classification.intent),
            trace: classification.trace,
        })
    }

    /// A scoped laureate narrows retrieval to that laureate's chunks, but
    /// never overrides a filter the caller set explicitly. Last names only
    /// scope when they resolve to exactly one laureate.
    fn apply_scoped_entity(
        &self,
        mut filters: SearchFilters,
        classification: &Classification,
    ) -> SearchFilters {
        let Some(scoped) = &classification.scoped_entity else {
            return filters;
        };
        if filters.iter().any(|(field, _)| field == "laureate") {
            return filters;
        }
        let full_name = self
            .laureates
            .iter()
            .find(|l| l.full_name == *scoped)
            .map(|l| l.full_name.clone())
            .or_else(|| {
                let mut matches = self.laureates.iter().filter(|l| l.last_name == *scoped);
                let first = matches.next()?;
                matches.next().is_none().then(|| first.full_name.clone())
            });
        if let Some(name) = full_name {
            // The field name is static and valid, so this cannot fail.
            let _ = filters.insert("laureate", name);
        }
        filters
    }

    /// Run one suspension-point stage under its own timeout, capped by the
    /// remaining query deadline.
    async fn stage<T, E>(
        &self,
        name: &'static str,
        limit: Duration,
        deadline: Instant,
        future: impl Future<Output = Result<T, E>>,
    ) -> Result<Result<T, E>, EngineError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(EngineError::Timeout { stage: name });
        }
        let budget = limit.min(deadline - now);
        tokio::time::timeout(budget, future)
            .await
            .map_err(|_| EngineError::Timeout { stage: name })
    }

    /// Probe the external collaborators and static data.
    pub async fn health(&self) -> HealthReport {
        let embedder = match self.embedder.health().await {
            Ok(health) => health.status,
            Err(error) => format!("error: {error}"),
        };
        let store = match self.embedder.embed("health probe").await {
            Ok(vector) => match self
                .store
                .search(&vector, 1, 0.0, &SearchFilters::new())
                .await
            {
                Ok(_) => "ok".to_string(),
                Err(error) => format!("error: {error}"),
            },
            Err(error) => format!("unprobed (embedding failed: {error})"),
        };
        HealthReport {
            embedder,
            store,
            taxonomy_terms: self.expander.taxonomy().term_count(),
            laureates: self.laureates.len(),
        }
    }

    /// Amortize cold starts at service start: embedder health + throwaway
    /// embedding, plus one probe search against the store.
    pub async fn warmup(&self) -> HealthReport {
        if let Err(error) = self.embedder.warmup().await {
            tracing::warn!(%error, "embedder warmup failed");
        }
        self.health().await
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

fn intent_slug(intent: Intent) -> &'static str {
    match intent {
        Intent::Factual => "factual",
        Intent::Thematic => "thematic",
        Intent::Generative => "generative",
    }
}

fn subtype_slug(subtype: ThematicSubtype) -> &'static str {
    match subtype {
        ThematicSubtype::Synthesis => "synthesis",
        ThematicSubtype::Enumerative => "enumerative",
        ThematicSubtype::Analytical => "analytical",
        ThematicSubtype::Exploratory => "exploratory",
    }
}

fn expansion_slug(method: ExpansionMethod) -> &'static str {
    match method {
        ExpansionMethod::EmbeddingRanked => "embedding_ranked",
        ExpansionMethod::SurfaceOnly => "surface_only",
    }
}

/// Caller-provided knobs override the profile; the profile fills the rest.
/// `max_return` never exceeds the resolved `top_k`.
fn resolve_options(
    profile: SizingProfile,
    request: &QueryRequest,
    filters: SearchFilters,
) -> RetrievalOptions {
    let top_k = request.top_k.unwrap_or(profile.top_k).max(1);
    let score_threshold = request.score_threshold.unwrap_or(profile.score_threshold);
    let max_return = profile.max_return.min(top_k);
    RetrievalOptions {
        top_k,
        score_threshold,
        filters,
        min_return: profile.min_return.min(max_return),
        max_return,
    }
}

fn audit_chunk(chunk: &RetrievedChunk) -> AuditChunk {
    AuditChunk {
        chunk_id: chunk.chunk.chunk_id.clone(),
        laureate: chunk.chunk.laureate.clone(),
        year_awarded: chunk.chunk.year_awarded,
        score: chunk.score,
    }
}

fn source_ref(chunk: &RetrievedChunk) -> SourceRef {
    SourceRef {
        laureate: chunk.chunk.laureate.clone(),
        year_awarded: chunk.chunk.year_awarded,
        source_type: chunk.chunk.source_type.label().to_string(),
        text_snippet: truncate_chars(&chunk.chunk.text, 280),
        score: chunk.score,
        chunk_id: chunk.chunk.chunk_id.clone(),
    }
}

/// Truncate to at most `max_chars` characters, appending `…` when cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
