//! Vector store access: the chunk payload schema, validated payload filters,
//! and the `ChunkStore` seam with a Qdrant-backed implementation plus an
//! in-memory brute-force store for offline runs and tests.

pub mod qdrant;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use qdrant::QdrantStore;

/// Payload fields the collection indexes for filtering. Anything else in a
/// filter is rejected before a request goes out.
pub const FILTERABLE_FIELDS: &[&str] = &[
    "laureate",
    "country",
    "gender",
    "year_awarded",
    "source_type",
    "category",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    NobelLecture,
    CeremonySpeech,
    AcceptanceSpeech,
}

impl SourceType {
    /// Human-readable label used in prompt context headers and source lists.
    pub fn label(self) -> &'static str {
        match self {
            SourceType::NobelLecture => "Nobel lecture",
            SourceType::CeremonySpeech => "ceremony speech",
            SourceType::AcceptanceSpeech => "acceptance speech",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nobel_lecture" => Ok(SourceType::NobelLecture),
            "ceremony_speech" => Ok(SourceType::CeremonySpeech),
            "acceptance_speech" => Ok(SourceType::AcceptanceSpeech),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            SourceType::NobelLecture => "nobel_lecture",
            SourceType::CeremonySpeech => "ceremony_speech",
            SourceType::AcceptanceSpeech => "acceptance_speech",
        };
        f.write_str(slug)
    }
}

/// One retrieval unit: a span of a speech with denormalized laureate fields.
/// Produced by the offline chunking pipeline and read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub source_type: SourceType,
    pub chunk_index: u32,
    pub text: String,
    pub laureate: String,
    pub year_awarded: u32,
    pub country: String,
    pub gender: String,
    pub category: String,
}

/// A chunk with its similarity score and 0-based rank within one search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
    pub rank: usize,
}

/// The point id in the vector collection is a deterministic function of the
/// chunk id, so index rebuilds keep ids stable.
pub fn point_id_for_chunk(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes())
}

// ── Filters ───────────────────────────────────────────────────────────────────

/// A conjunction of equality predicates over the indexed payload fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    fields: BTreeMap<String, String>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, value: impl Into<String>) -> Result<(), StoreError> {
        if !FILTERABLE_FIELDS.contains(&field) {
            return Err(StoreError::InvalidFilter(format!(
                "field '{field}' is not filterable (expected one of: {})",
                FILTERABLE_FIELDS.join(", ")
            )));
        }
        let value = value.into();
        if field == "year_awarded" && value.parse::<i64>().is_err() {
            return Err(StoreError::InvalidFilter(format!(
                "year_awarded filter '{value}' is not an integer"
            )));
        }
        self.fields.insert(field.to_string(), value);
        Ok(())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut filters = Self::new();
        for (field, value) in pairs {
            filters.insert(field.as_ref(), value)?;
        }
        Ok(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether a chunk's denormalized fields satisfy every predicate.
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        self.fields.iter().all(|(field, value)| match field.as_str() {
            "laureate" => chunk.laureate.eq_ignore_ascii_case(value),
            "country" => chunk.country.eq_ignore_ascii_case(value),
            "gender" => chunk.gender.eq_ignore_ascii_case(value),
            "year_awarded" => value.parse::<u32>() == Ok(chunk.year_awarded),
            "source_type" => chunk.source_type.to_string() == *value,
            "category" => chunk.category.eq_ignore_ascii_case(value),
            _ => false,
        })
    }
}

// ── The store seam ────────────────────────────────────────────────────────────

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// k-NN search. Results score at least `score_threshold`, are ordered by
    /// score descending with chunk id ascending on ties, and carry 0-based
    /// ranks. An empty result is not an error.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError>;
}

/// Deterministic ordering shared by every implementation: score descending,
/// chunk id ascending on ties; ranks assigned after the sort.
pub fn rank_chunks(mut chunks: Vec<(ChunkRecord, f32)>, top_k: usize) -> Vec<ScoredChunk> {
    chunks.sort_by(|(a_chunk, a_score), (b_chunk, b_score)| {
        b_score
            .total_cmp(a_score)
            .then_with(|| a_chunk.chunk_id.cmp(&b_chunk.chunk_id))
    });
    chunks.truncate(top_k);
    chunks
        .into_iter()
        .enumerate()
        .map(|(rank, (chunk, score))| ScoredChunk { chunk, score, rank })
        .collect()
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// Brute-force cosine search over points held in memory. Backs tests and the
/// offline profile; vectors are assumed unit-norm so the dot product is the
/// cosine similarity.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    points: Vec<(ChunkRecord, Vec<f32>)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: ChunkRecord, vector: Vec<f32>) {
        self.points.push((chunk, vector));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let candidates: Vec<(ChunkRecord, f32)> = self
            .points
            .iter()
            .filter(|(chunk, _)| filters.matches(chunk))
            .map(|(chunk, point)| (chunk.clone(), dot(point, vector)))
            .filter(|(_, score)| *score >= score_threshold)
            .collect();
        Ok(rank_chunks(candidates, top_k))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
