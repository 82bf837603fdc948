//! Retrievers: the plain single-query path and the thematic multi-query
//! path with merge, dedup, and rerank. Both honor the shared options
//! contract: results score at least the effective threshold and the count
//! lands in `[min_return, max_return]` unless the store itself had fewer
//! candidates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;

use laureate_embedder::{Embedder, EmbeddingError};
use laureate_intent::{KeywordExpander, ThematicSubtype};
use laureate_store::{ChunkRecord, ChunkStore, ScoredChunk, SearchFilters, StoreError};

/// One relaxation step is allowed when fewer than `min_return` chunks clear
/// the threshold: the threshold drops to this fraction of itself and the
/// search runs once more.
const RELAXATION_FACTOR: f32 = 0.75;

/// Bound on concurrent per-term vector searches within one query.
pub const DEFAULT_FANOUT: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-call knobs. The engine resolves these from the subtype sizing profile
/// and any caller-provided overrides before the retriever sees them.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub score_threshold: f32,
    pub filters: SearchFilters,
    pub min_return: usize,
    pub max_return: usize,
}

/// Retrieval sizing per thematic subtype, plus the profiles for the
/// factual-RAG fallback and generative paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingProfile {
    pub top_k: usize,
    pub min_return: usize,
    pub max_return: usize,
    pub score_threshold: f32,
}

impl SizingProfile {
    pub fn for_subtype(subtype: ThematicSubtype) -> Self {
        match subtype {
            ThematicSubtype::Synthesis => Self {
                top_k: 15,
                min_return: 5,
                max_return: 12,
                score_threshold: 0.2,
            },
            ThematicSubtype::Enumerative => Self {
                top_k: 20,
                min_return: 8,
                max_return: 16,
                score_threshold: 0.2,
            },
            ThematicSubtype::Analytical => Self {
                top_k: 20,
                min_return: 8,
                max_return: 14,
                score_threshold: 0.2,
            },
            ThematicSubtype::Exploratory => Self {
                top_k: 12,
                min_return: 4,
                max_return: 10,
                score_threshold: 0.2,
            },
        }
    }

    /// Used when a factual query misses every metadata rule and falls
    /// through to retrieval.
    pub fn factual_fallback() -> Self {
        Self {
            top_k: 5,
            min_return: 3,
            max_return: 5,
            score_threshold: 0.25,
        }
    }

    /// Generative queries ride the plain retriever with exploratory sizing:
    /// enough context to imitate a voice without flooding the prompt.
    pub fn generative() -> Self {
        Self::for_subtype(ThematicSubtype::Exploratory)
    }

    pub fn options(&self, filters: SearchFilters) -> RetrievalOptions {
        RetrievalOptions {
            top_k: self.top_k,
            score_threshold: self.score_threshold,
            filters,
            min_return: self.min_return,
            max_return: self.max_return,
        }
    }
}

/// A chunk as handed to the prompt builder: store ordering plus, on the
/// thematic path, the expansion term that produced its winning score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: ChunkRecord,
    pub score: f32,
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_term: Option<String>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError>;
}

fn to_retrieved(chunks: Vec<ScoredChunk>) -> Vec<RetrievedChunk> {
    chunks
        .into_iter()
        .map(|scored| RetrievedChunk {
            chunk: scored.chunk,
            score: scored.score,
            rank: scored.rank,
            source_term: None,
        })
        .collect()
}

// ── Plain retriever ───────────────────────────────────────────────────────────

/// Single query → single embedding → single search, with the one-step
/// threshold relaxation when the result set is too thin.
pub struct PlainRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
}

impl PlainRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn ChunkStore>) -> Self {
        Self { embedder, store }
    }
}

#[async_trait]
impl Retriever for PlainRetriever {
    async fn retrieve(
        &self,
        query: &str,
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let embedding = self.embedder.embed(query).await?;

        let mut results = self
            .store
            .search(&embedding, opts.top_k, opts.score_threshold, &opts.filters)
            .await?;

        if results.len() < opts.min_return {
            let relaxed = opts.score_threshold * RELAXATION_FACTOR;
            tracing::debug!(
                got = results.len(),
                min_return = opts.min_return,
                relaxed,
                "thin result set, relaxing threshold once"
            );
            results = self
                .store
                .search(&embedding, opts.top_k, relaxed, &opts.filters)
                .await?;
        }

        results.truncate(opts.max_return);
        Ok(to_retrieved(results))
    }
}

// ── Thematic retriever ────────────────────────────────────────────────────────

/// Multi-query retrieval over the expanded term set ∪ the original query.
/// Per-term searches run concurrently under a fan-out bound; results merge
/// by chunk id keeping the maximum score and the term that produced it.
pub struct ThematicRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    expander: Arc<KeywordExpander>,
    fanout: usize,
}

impl ThematicRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ChunkStore>,
        expander: Arc<KeywordExpander>,
    ) -> Self {
        Self {
            embedder,
            store,
            expander,
            fanout: DEFAULT_FANOUT,
        }
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(1);
        self
    }

    /// Smaller per-query depth so the merged pool stays near `top_k`.
    fn per_query_k(top_k: usize, query_count: usize) -> usize {
        ((top_k as f32 * 1.5) / query_count.max(1) as f32).ceil() as usize + 2
    }

    /// Retrieve with an already-computed expansion term set. The engine uses
    /// this directly so the expansion it audits is the expansion that ran.
    pub async fn retrieve_with_terms(
        &self,
        query: &str,
        terms: &[String],
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        // Original query first, then expansion terms, deduplicated.
        let mut queries: Vec<String> = Vec::with_capacity(terms.len() + 1);
        queries.push(query.to_string());
        for term in terms {
            if !queries.contains(term) {
                queries.push(term.clone());
            }
        }

        // One batched embedding call when possible; sequential singles as
        // the fallback.
        let embeddings = match self.embedder.embed_batch(&queries).await {
            Ok(embeddings) => embeddings,
            Err(EmbeddingError::Rejected(reason)) => {
                return Err(EmbeddingError::Rejected(reason).into());
            }
            Err(error) => {
                tracing::warn!(%error, "batch embedding failed, embedding sequentially");
                let mut singles = Vec::with_capacity(queries.len());
                for text in &queries {
                    singles.push(self.embedder.embed(text).await?);
                }
                singles
            }
        };

        let merged = self
            .fan_out_and_merge(&queries, embeddings, opts, opts.score_threshold)
            .await?;

        let merged = if merged.len() < opts.min_return {
            let relaxed = opts.score_threshold * RELAXATION_FACTOR;
            tracing::debug!(
                got = merged.len(),
                min_return = opts.min_return,
                relaxed,
                "thin merged set, relaxing threshold once"
            );
            let embeddings = match self.embedder.embed_batch(&queries).await {
                Ok(embeddings) => embeddings,
                Err(_) => {
                    let mut singles = Vec::with_capacity(queries.len());
                    for text in &queries {
                        singles.push(self.embedder.embed(text).await?);
                    }
                    singles
                }
            };
            self.fan_out_and_merge(&queries, embeddings, opts, relaxed)
                .await?
        } else {
            merged
        };

        Ok(merged.into_iter().take(opts.max_return).collect())
    }

    async fn fan_out_and_merge(
        &self,
        queries: &[String],
        embeddings: Vec<Vec<f32>>,
        opts: &RetrievalOptions,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let per_query_k = Self::per_query_k(opts.top_k, queries.len());

        // Searches for distinct terms are independent; run them concurrently
        // under the fan-out bound. try-collect semantics: the first hard
        // failure aborts the stream, dropping (cancelling) in-flight
        // branches.
        let mut branches = futures::stream::iter(embeddings.into_iter().enumerate().map(
            |(index, embedding)| {
                let store = Arc::clone(&self.store);
                let filters = opts.filters.clone();
                async move {
                    let hits = store
                        .search(&embedding, per_query_k, score_threshold, &filters)
                        .await?;
                    Ok::<_, RetrievalError>((index, hits))
                }
            },
        ))
        .buffer_unordered(self.fanout);

        let mut per_branch: Vec<(usize, Vec<ScoredChunk>)> = Vec::with_capacity(queries.len());
        while let Some(result) = branches.next().await {
            per_branch.push(result?);
        }
        drop(branches);

        // Completion order is nondeterministic; merge in query order so the
        // winning source term on score ties is stable.
        per_branch.sort_by_key(|(index, _)| *index);

        let mut merged: HashMap<String, (ChunkRecord, f32, String)> = HashMap::new();
        for (index, hits) in per_branch {
            let term = &queries[index];
            for hit in hits {
                match merged.get_mut(&hit.chunk.chunk_id) {
                    Some((_, best_score, best_term)) => {
                        if hit.score > *best_score {
                            *best_score = hit.score;
                            *best_term = term.clone();
                        }
                    }
                    None => {
                        merged.insert(
                            hit.chunk.chunk_id.clone(),
                            (hit.chunk, hit.score, term.clone()),
                        );
                    }
                }
            }
        }

        // Rerank the merged pool: score descending, chunk id ascending.
        let mut ranked: Vec<(ChunkRecord, f32, String)> = merged.into_values().collect();
        ranked.sort_by(|(a_chunk, a_score, _), (b_chunk, b_score, _)| {
            b_score
                .total_cmp(a_score)
                .then_with(|| a_chunk.chunk_id.cmp(&b_chunk.chunk_id))
        });
        ranked.retain(|(_, score, _)| *score >= score_threshold);

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(rank, (chunk, score, term))| RetrievedChunk {
                chunk,
                score,
                rank,
                source_term: Some(term),
            })
            .collect())
    }
}

#[async_trait]
impl Retriever for ThematicRetriever {
    async fn retrieve(
        &self,
        query: &str,
        opts: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let embedding = self.embedder.embed(query).await.ok();
        let expansion = self.expander.expand(query, embedding.as_deref());
        self.retrieve_with_terms(query, &expansion.terms, opts).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use laureate_embedder::OfflineEmbedder;
    use laureate_intent::{ExpanderConfig, ThemeTaxonomy, Theme};
    use laureate_store::{InMemoryStore, SourceType};
    use std::collections::HashMap as StdHashMap;

    const DIM: usize = 64;

    fn chunk(id: &str, laureate: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            source_type: SourceType::NobelLecture,
            chunk_index: 0,
            text: text.to_string(),
            laureate: laureate.to_string(),
            year_awarded: 1993,
            country: "United States".to_string(),
            gender: "female".to_string(),
            category: "Literature".to_string(),
        }
    }

    async fn seeded_store(embedder: &OfflineEmbedder, texts: &[(&str, &str)]) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for (id, text) in texts {
            let vector = embedder.embed(text).await.unwrap();
            store.insert(chunk(id, "Toni Morrison", text), vector);
        }
        store
    }

    fn options(top_k: usize, threshold: f32, min_return: usize, max_return: usize) -> RetrievalOptions {
        RetrievalOptions {
            top_k,
            score_threshold: threshold,
            filters: SearchFilters::new(),
            min_return,
            max_return,
        }
    }

    async fn taxonomy_for(embedder: &OfflineEmbedder, terms: &[&str]) -> ThemeTaxonomy {
        // Term embeddings must come from the same model as query embeddings;
        // the offline embedder plays that role in tests.
        let mut embeddings: StdHashMap<String, Vec<f32>> = StdHashMap::new();
        for term in terms {
            let vector = embedder.embed(term).await.unwrap();
            embeddings.insert((*term).to_string(), vector);
        }
        ThemeTaxonomy::from_parts(
            vec![Theme {
                name: "justice".to_string(),
                terms: terms.iter().map(|t| (*t).to_string()).collect(),
            }],
            embeddings,
            DIM,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn plain_retriever_returns_exact_match_first() {
        let embedder = Arc::new(OfflineEmbedder::new(DIM));
        let store = seeded_store(
            &embedder,
            &[
                ("c1", "justice and the law"),
                ("c2", "the sea and sailing"),
                ("c3", "justice and the law"),
            ],
        )
        .await;

        let retriever = PlainRetriever::new(embedder, Arc::new(store));
        let results = retriever
            .retrieve("justice and the law", &options(10, 0.5, 1, 10))
            .await
            .unwrap();

        assert!(!results.is_empty());
        // Two identical texts tie at similarity 1.0; chunk id breaks the tie.
        assert_eq!(results[0].chunk.chunk_id, "c1");
        assert_eq!(results[0].rank, 0);
        assert!(results.iter().all(|r| r.score >= 0.5));
        assert!(results.iter().all(|r| r.source_term.is_none()));
    }

    #[tokio::test]
    async fn plain_retriever_relaxes_threshold_once_when_thin() {
        // Hand-built vectors so the scores are exact: the stored chunk sits
        // at cosine 0.8 from the query.
        let embedder = Arc::new(OfflineEmbedder::new(2));
        let query_vector = embedder.embed("the query text").await.unwrap();
        let mut offset = vec![query_vector[1], -query_vector[0]];
        let mut stored = vec![0.0f32; 2];
        for i in 0..2 {
            offset[i] *= 0.6;
            stored[i] = query_vector[i] * 0.8 + offset[i];
        }
        let mut store = InMemoryStore::new();
        store.insert(chunk("c1", "Toni Morrison", "near miss"), stored);

        let retriever =
            PlainRetriever::new(Arc::clone(&embedder) as Arc<dyn Embedder>, Arc::new(store));

        // 0.9 misses, but one relaxation step (0.9 × 0.75 = 0.675) admits
        // the chunk because min_return was not met.
        let results = retriever
            .retrieve("the query text", &options(10, 0.9, 1, 10))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.675 && results[0].score < 0.9);

        // With min_return satisfied by zero… a threshold nothing clears and
        // min_return 0 must not trigger the relaxation re-query.
        let none = retriever
            .retrieve("the query text", &options(10, 0.99, 0, 10))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn plain_retriever_caps_at_max_return() {
        let embedder = Arc::new(OfflineEmbedder::new(DIM));
        let texts: Vec<(String, String)> = (0..8)
            .map(|i| (format!("c{i}"), "justice in literature".to_string()))
            .collect();
        let pairs: Vec<(&str, &str)> = texts
            .iter()
            .map(|(id, text)| (id.as_str(), text.as_str()))
            .collect();
        let store = seeded_store(&embedder, &pairs).await;

        let retriever = PlainRetriever::new(embedder, Arc::new(store));
        let results = retriever
            .retrieve("justice in literature", &options(10, 0.2, 1, 3))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn thematic_retriever_merges_across_terms_and_records_sources() {
        let embedder = Arc::new(OfflineEmbedder::new(DIM));
        let store = seeded_store(
            &embedder,
            &[
                ("c1", "justice for all"),
                ("c2", "law and order"),
                ("c3", "gardening at dawn"),
            ],
        )
        .await;
        let expander = Arc::new(KeywordExpander::new(
            Arc::new(taxonomy_for(&embedder, &["justice for all", "law and order"]).await),
            ExpanderConfig::default(),
        ));

        let retriever = ThematicRetriever::new(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Arc::new(store),
            expander,
        );

        let results = retriever
            .retrieve_with_terms(
                "how do laureates think about justice",
                &["justice for all".to_string(), "law and order".to_string()],
                &options(10, 0.9, 1, 10),
            )
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"c2"));
        assert!(!ids.contains(&"c3"));
        // Each merged chunk records the term whose search produced its score.
        let c1 = results.iter().find(|r| r.chunk.chunk_id == "c1").unwrap();
        assert_eq!(c1.source_term.as_deref(), Some("justice for all"));
        let c2 = results.iter().find(|r| r.chunk.chunk_id == "c2").unwrap();
        assert_eq!(c2.source_term.as_deref(), Some("law and order"));
        // Ranks are contiguous after the merge.
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, (0..results.len()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn thematic_retriever_is_deterministic() {
        let embedder = Arc::new(OfflineEmbedder::new(DIM));
        let store = Arc::new(
            seeded_store(
                &embedder,
                &[
                    ("c1", "justice for all"),
                    ("c2", "law and order"),
                    ("c3", "memory and exile"),
                    ("c4", "the moral arc"),
                ],
            )
            .await,
        );
        let expander = Arc::new(KeywordExpander::new(
            Arc::new(taxonomy_for(&embedder, &["justice for all"]).await),
            ExpanderConfig::default(),
        ));
        let retriever = ThematicRetriever::new(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            store,
            expander,
        );

        let terms = vec!["justice for all".to_string(), "law and order".to_string()];
        let opts = options(10, 0.1, 1, 10);
        let first = retriever
            .retrieve_with_terms("justice", &terms, &opts)
            .await
            .unwrap();
        let second = retriever
            .retrieve_with_terms("justice", &terms, &opts)
            .await
            .unwrap();

        let first_ids: Vec<&str> = first.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        let second_ids: Vec<&str> = second.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn per_query_k_tracks_the_spec_formula() {
        // ceil(top_k · 1.5 / |queries|) + 2
        assert_eq!(ThematicRetriever::per_query_k(15, 5), 7);
        assert_eq!(ThematicRetriever::per_query_k(20, 1), 32);
        assert_eq!(ThematicRetriever::per_query_k(12, 11), 4);
        assert_eq!(ThematicRetriever::per_query_k(10, 0), 17);
    }

    #[test]
    fn sizing_profiles_match_the_routing_table() {
        let synthesis = SizingProfile::for_subtype(ThematicSubtype::Synthesis);
        assert_eq!((synthesis.top_k, synthesis.min_return, synthesis.max_return), (15, 5, 12));
        let enumerative = SizingProfile::for_subtype(ThematicSubtype::Enumerative);
        assert_eq!((enumerative.top_k, enumerative.min_return, enumerative.max_return), (20, 8, 16));
        let analytical = SizingProfile::for_subtype(ThematicSubtype::Analytical);
        assert_eq!((analytical.top_k, analytical.min_return, analytical.max_return), (20, 8, 14));
        let exploratory = SizingProfile::for_subtype(ThematicSubtype::Exploratory);
        assert_eq!((exploratory.top_k, exploratory.min_return, exploratory.max_return), (12, 4, 10));
        let factual = SizingProfile::factual_fallback();
        assert_eq!((factual.top_k, factual.min_return, factual.max_return), (5, 3, 5));
        assert_eq!(factual.score_threshold, 0.25);
    }
}
