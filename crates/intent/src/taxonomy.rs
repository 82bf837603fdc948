//! The keyword taxonomy: named themes, their related terms, and precomputed
//! unit-norm term embeddings produced with the same model as query
//! embeddings. Loaded once at start and shared read-only.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TaxonomyError {
    #[error("reading taxonomy at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing taxonomy at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("term '{term}' embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        term: String,
        actual: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaxonomyFile {
    themes: Vec<Theme>,
    #[serde(default)]
    embeddings: HashMap<String, Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct ThemeTaxonomy {
    themes: Vec<Theme>,
    embeddings: HashMap<String, Vec<f32>>,
    /// Flat term list in theme order, deduplicated first-occurrence-wins.
    terms: Vec<String>,
}

impl ThemeTaxonomy {
    pub fn load(path: impl AsRef<Path>, expected_dimension: usize) -> Result<Self, TaxonomyError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| TaxonomyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: TaxonomyFile =
            serde_json::from_str(&raw).map_err(|source| TaxonomyError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_parts(file.themes, file.embeddings, expected_dimension)
    }

    pub fn from_parts(
        themes: Vec<Theme>,
        embeddings: HashMap<String, Vec<f32>>,
        expected_dimension: usize,
    ) -> Result<Self, TaxonomyError> {
        for (term, vector) in &embeddings {
            if vector.len() != expected_dimension {
                return Err(TaxonomyError::DimensionMismatch {
                    term: term.clone(),
                    actual: vector.len(),
                    expected: expected_dimension,
                });
            }
        }

        // Each term belongs to at most one theme; duplicates keep their
        // first occurrence and later ones are dropped.
        let mut seen: HashMap<&str, &str> = HashMap::new();
        let mut deduped_themes: Vec<Theme> = Vec::with_capacity(themes.len());
        let mut terms: Vec<String> = Vec::new();
        for theme in &themes {
            let mut kept = Vec::with_capacity(theme.terms.len());
            for term in &theme.terms {
                match seen.get(term.as_str()) {
                    Some(owner) => {
                        tracing::debug!(term, first = owner, dropped_from = %theme.name, "duplicate taxonomy term");
                    }
                    None => {
                        seen.insert(term.as_str(), theme.name.as_str());
                        kept.push(term.clone());
                        terms.push(term.clone());
                    }
                }
            }
            deduped_themes.push(Theme {
                name: theme.name.clone(),
                terms: kept,
            });
        }

        tracing::info!(
            themes = deduped_themes.len(),
            terms = terms.len(),
            embedded = embeddings.len(),
            "theme taxonomy loaded"
        );
        Ok(Self {
            themes: deduped_themes,
            embeddings,
            terms,
        })
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    /// Every taxonomy term, in theme order, first occurrence only.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn term_embedding(&self, term: &str) -> Option<&[f32]> {
        self.embeddings.get(term).map(Vec::as_slice)
    }

    /// Themes whose name or any surface term appears textually (word-bounded)
    /// in the lowercased query.
    pub fn surface_themes(&self, query_lower: &str) -> Vec<&Theme> {
        self.themes
            .iter()
            .filter(|theme| {
                word_phrase_hit(query_lower, &theme.name.to_lowercase())
                    || theme
                        .terms
                        .iter()
                        .any(|term| word_phrase_hit(query_lower, &term.to_lowercase()))
            })
            .collect()
    }
}

fn word_phrase_hit(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testdata::{axis, sample_taxonomy};
    use super::*;

    #[test]
    fn duplicate_terms_keep_first_theme() {
        let themes = vec![
            Theme {
                name: "justice".to_string(),
                terms: vec!["justice".to_string(), "law".to_string()],
            },
            Theme {
                name: "power".to_string(),
                terms: vec!["law".to_string(), "authority".to_string()],
            },
        ];
        let taxonomy = ThemeTaxonomy::from_parts(themes, HashMap::new(), 4).unwrap();
        assert_eq!(taxonomy.terms(), &["justice", "law", "authority"]);
        assert_eq!(taxonomy.themes()[1].terms, vec!["authority"]);
    }

    #[test]
    fn dimension_mismatch_is_rejected_at_load() {
        let themes = vec![Theme {
            name: "justice".to_string(),
            terms: vec!["justice".to_string()],
        }];
        let embeddings = HashMap::from([("justice".to_string(), vec![1.0, 0.0, 0.0])]);
        let err = ThemeTaxonomy::from_parts(themes, embeddings, 8).unwrap_err();
        assert!(matches!(err, TaxonomyError::DimensionMismatch { .. }));
    }

    #[test]
    fn surface_themes_match_on_word_boundaries() {
        let taxonomy = sample_taxonomy(8);
        let hits = taxonomy.surface_themes("how do laureates write about exile");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "exile");

        // "lawful" must not surface the justice theme via "law".
        assert!(taxonomy.surface_themes("a lawful request").is_empty());
    }

    #[test]
    fn load_roundtrips_through_json() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("taxonomy.json");
        let file = TaxonomyFile {
            themes: vec![Theme {
                name: "memory".to_string(),
                terms: vec!["memory".to_string(), "remembrance".to_string()],
            }],
            embeddings: HashMap::from([
                ("memory".to_string(), axis(4, 0)),
                ("remembrance".to_string(), axis(4, 1)),
            ]),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;

        let taxonomy = ThemeTaxonomy::load(&path, 4)?;
        assert_eq!(taxonomy.term_count(), 2);
        assert!(taxonomy.term_embedding("memory").is_some());

        // Loading the same bytes twice yields the same flattened term list.
        let again = ThemeTaxonomy::load(&path, 4)?;
        assert_eq!(taxonomy.terms(), again.terms());
        Ok(())
    }
}
