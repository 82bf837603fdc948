//! Laureate metadata: the flattened record list loaded once at start and the
//! ordered registry of factual rules that answer queries without retrieval.

pub mod registry;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use registry::{FactualRegistry, MetadataAnswer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unknown,
}

/// A single laureate, flattened so year and category ride on the record.
///
/// The source file nests laureates under year entries; `year_awarded` and
/// `category` are filled in during flattening and default to empty values
/// while the nested form is being parsed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Laureate {
    pub full_name: String,
    pub last_name: String,
    pub year_awarded: u32,
    pub category: String,
    pub gender: Gender,
    pub country: String,
    pub place_of_birth: String,
    pub date_of_birth: String,
    pub date_of_death: Option<String>,
    pub prize_motivation: String,
    pub declined: bool,
    pub cited_work: bool,
    pub cited_work_title: Option<String>,
    pub language: String,
    pub life_blurb: String,
    pub work_blurb: String,
    pub lecture_title: Option<String>,
    pub nobel_lecture_ref: Option<String>,
    pub ceremony_speech_ref: Option<String>,
    pub acceptance_speech_ref: Option<String>,
}

/// One entry of the nested on-disk layout: a prize year with its laureates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearRecord {
    pub year_awarded: u32,
    pub category: String,
    #[serde(default)]
    pub laureates: Vec<Laureate>,
}

/// Flatten nested year records into one laureate list, stamping year and
/// category onto each record.
pub fn flatten(records: Vec<YearRecord>) -> Vec<Laureate> {
    let mut flat = Vec::new();
    for record in records {
        for mut laureate in record.laureates {
            laureate.year_awarded = record.year_awarded;
            laureate.category = record.category.clone();
            if laureate.last_name.is_empty() {
                laureate.last_name = laureate
                    .full_name
                    .split_whitespace()
                    .last()
                    .unwrap_or_default()
                    .to_string();
            }
            flat.push(laureate);
        }
    }
    flat
}

pub fn load_laureates(path: impl AsRef<Path>) -> Result<Vec<Laureate>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading laureate metadata at {}", path.display()))?;
    let records: Vec<YearRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing laureate metadata at {}", path.display()))?;
    let flat = flatten(records);
    tracing::info!(laureates = flat.len(), path = %path.display(), "laureate metadata loaded");
    Ok(flat)
}

// ── Name index ────────────────────────────────────────────────────────────────

/// Case-insensitive lookup of laureate names inside free text. Full names are
/// preferred over bare last names; the canonical spelling from the metadata is
/// returned, not the query's casing.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    full_names: Vec<String>,
    last_names: Vec<String>,
}

impl NameIndex {
    pub fn build(laureates: &[Laureate]) -> Self {
        let mut full_names: Vec<String> = laureates
            .iter()
            .map(|l| l.full_name.clone())
            .filter(|n| !n.is_empty())
            .collect();
        full_names.sort();
        full_names.dedup();

        let mut last_names: Vec<String> = laureates
            .iter()
            .map(|l| l.last_name.clone())
            .filter(|n| !n.is_empty())
            .collect();
        last_names.sort();
        last_names.dedup();

        Self {
            full_names,
            last_names,
        }
    }

    /// Find a laureate name mentioned in `text`, full name first.
    pub fn detect(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        for name in &self.full_names {
            if contains_word_phrase(&lower, &name.to_lowercase()) {
                return Some(name.clone());
            }
        }
        for name in &self.last_names {
            if contains_word_phrase(&lower, &name.to_lowercase()) {
                return Some(name.clone());
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.full_names.is_empty()
    }
}

/// Substring match constrained to word boundaries, so "Eco" does not match
/// inside "economy".
fn contains_word_phrase(haystack: &str, needle: &str) -> bool {
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
pub(crate) mod testdata {
    use super::*;

    pub fn laureate(full_name: &str, year: u32, country: &str, gender: Gender) -> Laureate {
        Laureate {
            full_name: full_name.to_string(),
            last_name: full_name
                .split_whitespace()
                .last()
                .unwrap_or_default()
                .to_string(),
            year_awarded: year,
            category: "Literature".to_string(),
            gender,
            country: country.to_string(),
            prize_motivation: format!("for the work of {full_name}"),
            date_of_birth: "1931-02-18".to_string(),
            ..Laureate::default()
        }
    }

    /// A small but representative laureate table used across the workspace's
    /// unit tests.
    pub fn sample_laureates() -> Vec<Laureate> {
        vec![
            laureate("Selma Lagerlöf", 1909, "Sweden", Gender::Female),
            laureate("William Faulkner", 1949, "United States", Gender::Male),
            laureate("Gabriel García Márquez", 1982, "Colombia", Gender::Male),
            laureate("Toni Morrison", 1993, "United States", Gender::Female),
            laureate("Seamus Heaney", 1995, "Ireland", Gender::Male),
            laureate("Kazuo Ishiguro", 2017, "United Kingdom", Gender::Male),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::testdata::sample_laureates;
    use super::*;

    #[test]
    fn flatten_stamps_year_and_category() {
        let nested = vec![
            YearRecord {
                year_awarded: 1993,
                category: "Literature".to_string(),
                laureates: vec![Laureate {
                    full_name: "Toni Morrison".to_string(),
                    ..Laureate::default()
                }],
            },
            YearRecord {
                year_awarded: 2017,
                category: "Literature".to_string(),
                laureates: vec![Laureate {
                    full_name: "Kazuo Ishiguro".to_string(),
                    ..Laureate::default()
                }],
            },
        ];

        let flat = flatten(nested);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].year_awarded, 1993);
        assert_eq!(flat[0].category, "Literature");
        assert_eq!(flat[0].last_name, "Morrison");
        assert_eq!(flat[1].year_awarded, 2017);
    }

    #[test]
    fn flatten_is_idempotent_under_equal_input() {
        let make = || {
            vec![YearRecord {
                year_awarded: 1995,
                category: "Literature".to_string(),
                laureates: vec![Laureate {
                    full_name: "Seamus Heaney".to_string(),
                    ..Laureate::default()
                }],
            }]
        };
        let a = flatten(make());
        let b = flatten(make());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn name_index_prefers_full_names() {
        let index = NameIndex::build(&sample_laureates());
        assert_eq!(
            index.detect("What did Toni Morrison say about justice?"),
            Some("Toni Morrison".to_string())
        );
        assert_eq!(
            index.detect("what did morrison say about justice"),
            Some("Morrison".to_string())
        );
        assert_eq!(index.detect("What did John Doe say about justice?"), None);
    }

    #[test]
    fn name_index_respects_word_boundaries() {
        let index = NameIndex::build(&sample_laureates());
        // "Heaneyville" must not match "Heaney".
        assert_eq!(index.detect("A trip to Heaneyville"), None);
        assert_eq!(
            index.detect("the speech by Seamus Heaney."),
            Some("Seamus Heaney".to_string())
        );
    }

    #[test]
    fn gender_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"female\"");
        let back: Gender = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(back, Gender::Unknown);
    }
}
