//! Keyword expansion: widen a thematic query into a ranked set of related
//! terms before retrieval. Deterministic for a given taxonomy and query
//! embedding; embedding failures degrade to surface matching only.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::taxonomy::ThemeTaxonomy;

#[derive(Debug, Clone, Copy)]
pub struct ExpanderConfig {
    /// Minimum cosine similarity for a taxonomy term to join the expansion.
    pub threshold: f32,
    /// Maximum number of expanded terms.
    pub cap: usize,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            threshold: 0.35,
            cap: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMethod {
    /// Surface theme seeding plus embedding-similarity ranking.
    EmbeddingRanked,
    /// Surface theme seeding only (no query embedding was available).
    SurfaceOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct Expansion {
    pub terms: Vec<String>,
    pub similarities: BTreeMap<String, f32>,
    pub method: ExpansionMethod,
}

pub struct KeywordExpander {
    taxonomy: Arc<ThemeTaxonomy>,
    config: ExpanderConfig,
}

impl KeywordExpander {
    pub fn new(taxonomy: Arc<ThemeTaxonomy>, config: ExpanderConfig) -> Self {
        Self { taxonomy, config }
    }

    pub fn taxonomy(&self) -> &ThemeTaxonomy {
        &self.taxonomy
    }

    /// Expand a query into related taxonomy terms.
    ///
    /// Seeds every term of each theme that surfaces textually in the query,
    /// then (when a query embedding is available) admits any taxonomy term
    /// whose cosine similarity clears the threshold. The result is
    /// deduplicated, sorted by similarity descending with the term string
    /// as tiebreak, and capped.
    pub fn expand(&self, query: &str, query_embedding: Option<&[f32]>) -> Expansion {
        let lower = query.to_lowercase();

        let mut seeds: BTreeSet<String> = BTreeSet::new();
        for theme in self.taxonomy.surface_themes(&lower) {
            for term in &theme.terms {
                seeds.insert(term.clone());
            }
        }

        let Some(embedding) = query_embedding else {
            // Degraded path: surface seeds only, in taxonomy order.
            let terms: Vec<String> = self
                .taxonomy
                .terms()
                .iter()
                .filter(|term| seeds.contains(*term))
                .take(self.config.cap)
                .cloned()
                .collect();
            tracing::debug!(terms = terms.len(), "expansion degraded to surface matching");
            return Expansion {
                terms,
                similarities: BTreeMap::new(),
                method: ExpansionMethod::SurfaceOnly,
            };
        };

        let mut scored: Vec<(String, f32)> = Vec::new();
        let mut similarities = BTreeMap::new();
        for term in self.taxonomy.terms() {
            let similarity = self
                .taxonomy
                .term_embedding(term)
                .map(|vector| cosine_similarity(vector, embedding))
                .unwrap_or(0.0);
            let is_seed = seeds.contains(term);
            if similarity >= self.config.threshold || is_seed {
                scored.push((term.clone(), similarity));
                similarities.insert(term.clone(), similarity);
            }
        }

        scored.sort_by(|(a_term, a_sim), (b_term, b_sim)| {
            b_sim.total_cmp(a_sim).then_with(|| a_term.cmp(b_term))
        });
        scored.truncate(self.config.cap);
        similarities.retain(|term, _| scored.iter().any(|(t, _)| t == term));

        let terms: Vec<String> = scored.into_iter().map(|(term, _)| term).collect();
        tracing::debug!(terms = terms.len(), "query expanded");
        Expansion {
            terms,
            similarities,
            method: ExpansionMethod::EmbeddingRanked,
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::testdata::{axis, sample_taxonomy};

    fn expander() -> KeywordExpander {
        KeywordExpander::new(Arc::new(sample_taxonomy(8)), ExpanderConfig::default())
    }

    #[test]
    fn surface_hit_seeds_the_whole_theme() {
        let expander = expander();
        // Embedding aligned with the "justice" axis; the query also surfaces
        // the justice theme textually.
        let expansion = expander.expand("how do laureates think about justice", Some(&axis(8, 0)));
        assert_eq!(expansion.method, ExpansionMethod::EmbeddingRanked);
        assert!(expansion.terms.contains(&"justice".to_string()));
        // Theme-mates join as seeds even with zero similarity.
        assert!(expansion.terms.contains(&"law".to_string()));
        assert!(expansion.terms.contains(&"morality".to_string()));
        // The highest-similarity term sorts first.
        assert_eq!(expansion.terms[0], "justice");
    }

    #[test]
    fn similarity_admits_terms_without_surface_hits() {
        let expander = expander();
        // Query embedding points at the "exile" axis but mentions no
        // taxonomy word.
        let expansion = expander.expand("writers far from home", Some(&axis(8, 3)));
        assert_eq!(expansion.terms, vec!["exile".to_string()]);
        assert!((expansion.similarities["exile"] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn no_embedding_downgrades_to_surface_only() {
        let expander = expander();
        let expansion = expander.expand("speeches about exile and displacement", None);
        assert_eq!(expansion.method, ExpansionMethod::SurfaceOnly);
        assert_eq!(
            expansion.terms,
            vec!["exile".to_string(), "displacement".to_string()]
        );
        assert!(expansion.similarities.is_empty());
    }

    #[test]
    fn expansion_is_deterministic() {
        let expander = expander();
        let embedding = axis(8, 0);
        let a = expander.expand("justice in nobel lectures", Some(&embedding));
        let b = expander.expand("justice in nobel lectures", Some(&embedding));
        assert_eq!(a.terms, b.terms);
        assert_eq!(a.similarities, b.similarities);
    }

    #[test]
    fn cap_limits_the_expansion() {
        let expander = KeywordExpander::new(
            Arc::new(sample_taxonomy(8)),
            ExpanderConfig {
                threshold: 0.35,
                cap: 2,
            },
        );
        let expansion = expander.expand("justice and morality and law", Some(&axis(8, 0)));
        assert_eq!(expansion.terms.len(), 2);
        assert_eq!(expansion.similarities.len(), 2);
    }

    #[test]
    fn ties_break_on_the_term_string() {
        let expander = expander();
        // No surface hits; embedding equidistant from the "law" and
        // "morality" axes, below threshold for everything else.
        let mut embedding = vec![0.0f32; 8];
        embedding[1] = std::f32::consts::FRAC_1_SQRT_2;
        embedding[2] = std::f32::consts::FRAC_1_SQRT_2;
        let expansion = expander.expand("unrelated words", Some(&embedding));
        assert_eq!(expansion.terms, vec!["law".to_string(), "morality".to_string()]);
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
