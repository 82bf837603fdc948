//! Rule-based intent classification.
//!
//! Precedence is generative > thematic > factual when cues from several
//! families co-occur. A query that fires no cue at all cannot be routed and
//! raises [`IntentError::Ambiguous`] so the caller can ask for a rephrase
//! instead of guessing.

use serde::{Deserialize, Serialize};

use laureate_metadata::NameIndex;

/// Subjects that stand in for "the laureates as a group".
pub const SUBJECT_ALIASES: &[&str] = &[
    "laureates",
    "winners",
    "recipients",
    "authors",
    "they",
    "these voices",
    "nobelists",
];

/// Reflective verbs that, combined with a plural subject, signal a
/// synthesis-style thematic question ("how do winners think about…").
pub const REFLECTIVE_VERBS: &[&str] = &[
    "think",
    "feel",
    "say",
    "reflect",
    "talk about",
    "treat",
    "explore",
    "approach",
    "address",
];

const GENERATIVE_VERBS: &[&str] = &["write", "compose", "draft", "paraphrase", "rewrite", "generate"];

const STYLE_PHRASES: &[&str] = &[
    "in the style of",
    "as if written by",
    "as if you were",
    "like a nobel",
];

const THEME_NOUNS: &[&str] = &["theme", "themes", "motif", "motifs", "pattern", "patterns", "topic", "topics"];

const COMPARISON_CUES: &[&str] = &["compare", "contrast", "versus", "differ"];

const FACTUAL_CUES: &[&str] = &[
    "who",
    "when",
    "where",
    "what year",
    "what years",
    "which year",
    "which years",
    "what country",
    "what was",
    "what is",
    "how many",
    "summarize",
    "give me",
    "show me",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Factual,
    Thematic,
    Generative,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub matched_terms: Vec<String>,
    pub scoped_entity: Option<String>,
    /// Human-readable reasons for the decision, in the order cues fired.
    pub trace: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("could not determine intent for query: {0:?}")]
    Ambiguous(String),
}

/// Whether the query contains a "subject alias followed by reflective verb"
/// phrase like "laureates think" or "recipients say".
pub fn matches_synthesis_frame(query_lower: &str) -> Option<String> {
    for subject in SUBJECT_ALIASES {
        for verb in REFLECTIVE_VERBS {
            let phrase = format!("{subject} {verb}");
            if query_lower.contains(&phrase) {
                return Some(phrase);
            }
        }
    }
    None
}

fn contains_word(haystack: &str, needle: &str) -> bool {
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

pub struct IntentClassifier {
    names: NameIndex,
}

impl IntentClassifier {
    pub fn new(names: NameIndex) -> Self {
        Self { names }
    }

    pub fn classify(&self, query: &str) -> Result<Classification, IntentError> {
        let lower = query.to_lowercase();
        if lower.chars().all(|c| !c.is_alphanumeric()) {
            return Err(IntentError::Ambiguous(query.to_string()));
        }

        let scoped_entity = self.names.detect(query);
        let mut trace = Vec::new();
        if let Some(name) = &scoped_entity {
            trace.push(format!("laureate name '{name}' scopes retrieval"));
        }

        // ── generative cues ──────────────────────────────────────────────
        let mut generative: Vec<String> = Vec::new();
        for verb in GENERATIVE_VERBS {
            if contains_word(&lower, verb) {
                generative.push((*verb).to_string());
                trace.push(format!("generative verb '{verb}'"));
            }
        }
        for phrase in STYLE_PHRASES {
            if lower.contains(phrase) {
                generative.push((*phrase).to_string());
                trace.push(format!("stylistic phrase '{phrase}'"));
            }
        }

        // ── thematic cues ────────────────────────────────────────────────
        let mut thematic: Vec<String> = Vec::new();
        if let Some(frame) = matches_synthesis_frame(&lower) {
            trace.push(format!("synthesis frame '{frame}'"));
            thematic.push(frame);
        }
        for noun in THEME_NOUNS {
            if contains_word(&lower, noun) {
                thematic.push((*noun).to_string());
                trace.push(format!("theme noun '{noun}'"));
            }
        }
        for cue in COMPARISON_CUES {
            if contains_word(&lower, cue) {
                thematic.push((*cue).to_string());
                trace.push(format!("comparison cue '{cue}'"));
            }
        }
        if lower.contains(" vs ") || lower.contains(" vs.") {
            thematic.push("vs".to_string());
            trace.push("comparison cue 'vs'".to_string());
        }
        // A named laureate plus a reflective verb reads as "what did X say
        // about…", which is thematic scoped to that laureate.
        if scoped_entity.is_some() {
            for verb in REFLECTIVE_VERBS {
                if contains_word(&lower, verb) {
                    thematic.push((*verb).to_string());
                    trace.push(format!("reflective verb '{verb}' scoped to a laureate"));
                    break;
                }
            }
        }

        // ── factual cues ─────────────────────────────────────────────────
        let mut factual: Vec<String> = Vec::new();
        for cue in FACTUAL_CUES {
            if contains_word(&lower, cue) {
                factual.push((*cue).to_string());
                trace.push(format!("factual cue '{cue}'"));
            }
        }

        let (intent, matched) = if !generative.is_empty() {
            (Intent::Generative, generative)
        } else if !thematic.is_empty() {
            (Intent::Thematic, thematic)
        } else if !factual.is_empty() {
            (Intent::Factual, factual)
        } else {
            tracing::debug!(query, "no intent cue fired");
            return Err(IntentError::Ambiguous(query.to_string()));
        };

        let confidence = (0.7 + 0.06 * (matched.len().saturating_sub(1)) as f32).min(0.95);
        trace.push(format!("intent={intent:?} confidence={confidence:.2}").to_lowercase());

        Ok(Classification {
            intent,
            confidence,
            matched_terms: matched,
            scoped_entity,
            trace,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use laureate_metadata::{Gender, Laureate, NameIndex};

    fn laureate(full_name: &str, year: u32) -> Laureate {
        Laureate {
            full_name: full_name.to_string(),
            last_name: full_name
                .split_whitespace()
                .last()
                .unwrap_or_default()
                .to_string(),
            year_awarded: year,
            gender: Gender::Unknown,
            ..Laureate::default()
        }
    }

    fn classifier() -> IntentClassifier {
        let laureates = vec![
            laureate("Toni Morrison", 1993),
            laureate("Seamus Heaney", 1995),
            laureate("Kazuo Ishiguro", 2017),
            laureate("Camilo José Cela", 1989),
        ];
        IntentClassifier::new(NameIndex::build(&laureates))
    }

    #[test]
    fn factual_queries_classify_as_factual() {
        let queries = [
            "When did Kazuo Ishiguro win the Nobel Prize?",
            "Where was Camilo José Cela born?",
            "Summarize the 1989 acceptance speech.",
            "Who won the Nobel Prize in 2001?",
            "Give me the speech by Seamus Heaney.",
            "When did Morrison win?",
            "Who won in 1990?",
            "What years did Americans win the prize?",
            "What was the motivation for Toni Morrison?",
        ];
        let classifier = classifier();
        for query in queries {
            let result = classifier.classify(query).unwrap();
            assert_eq!(result.intent, Intent::Factual, "query: {query}");
        }
    }

    #[test]
    fn thematic_queries_classify_as_thematic() {
        let queries = [
            "What are common themes in Nobel lectures?",
            "How have topics changed over time?",
            "Compare speeches from U.S. vs. European laureates.",
            "What motifs are recurring across decades?",
            "What patterns emerge in acceptance speeches?",
            "What themes are present in Nobel lectures?",
            "How do laureates talk about justice?",
            "Compare motifs across laureates.",
        ];
        let classifier = classifier();
        for query in queries {
            let result = classifier.classify(query).unwrap();
            assert_eq!(result.intent, Intent::Thematic, "query: {query}");
        }
    }

    #[test]
    fn generative_queries_classify_as_generative() {
        let queries = [
            "Write a speech in the style of Toni Morrison.",
            "Compose a Nobel acceptance for a teacher.",
            "Paraphrase this text as if written by a laureate.",
            "Generate a motivational quote like a Nobel winner.",
            "Draft a letter as if you were a Nobel laureate.",
            "Rewrite this in the style of a laureate.",
        ];
        let classifier = classifier();
        for query in queries {
            let result = classifier.classify(query).unwrap();
            assert_eq!(result.intent, Intent::Generative, "query: {query}");
        }
    }

    #[test]
    fn scoping_works_for_full_and_last_names() {
        let classifier = classifier();
        let full = classifier
            .classify("What did Toni Morrison say about justice?")
            .unwrap();
        assert_eq!(full.intent, Intent::Thematic);
        assert_eq!(full.scoped_entity.as_deref(), Some("Toni Morrison"));

        let last = classifier
            .classify("What did Morrison say about justice?")
            .unwrap();
        assert_eq!(last.intent, Intent::Thematic);
        assert_eq!(last.scoped_entity.as_deref(), Some("Morrison"));
    }

    #[test]
    fn generative_outranks_thematic_and_factual() {
        let classifier = classifier();
        let over_thematic = classifier
            .classify("Write a speech about common themes in Nobel lectures.")
            .unwrap();
        assert_eq!(over_thematic.intent, Intent::Generative);

        let over_factual = classifier
            .classify("Compose a summary of what Toni Morrison said about justice.")
            .unwrap();
        assert_eq!(over_factual.intent, Intent::Generative);
    }

    #[test]
    fn thematic_outranks_factual() {
        let classifier = classifier();
        let result = classifier
            .classify("What are common themes in Toni Morrison's speeches?")
            .unwrap();
        assert_eq!(result.intent, Intent::Thematic);
        assert_eq!(result.scoped_entity.as_deref(), Some("Toni Morrison"));
    }

    #[test]
    fn classification_is_case_insensitive() {
        let classifier = classifier();
        assert_eq!(
            classifier
                .classify("WRITE ME a summary of themes in Nobel lectures.")
                .unwrap()
                .intent,
            Intent::Generative
        );
        assert_eq!(
            classifier.classify("WHAT THEMES ARE PRESENT?").unwrap().intent,
            Intent::Thematic
        );
        assert_eq!(
            classifier.classify("WHEN DID MORRISON WIN?").unwrap().intent,
            Intent::Factual
        );
    }

    #[test]
    fn cue_free_queries_are_ambiguous() {
        let queries = [
            "Tell me about the Nobel Prize.",
            "Information on laureates.",
            "Details about the ceremony.",
            "",
            "   ",
            "asdfghjkl",
            "?!@#$%",
            "wha",
        ];
        let classifier = classifier();
        for query in queries {
            assert!(
                matches!(classifier.classify(query), Err(IntentError::Ambiguous(_))),
                "query should be ambiguous: {query:?}"
            );
        }
    }

    #[test]
    fn trace_names_the_cues_that_fired() {
        let classifier = classifier();
        let result = classifier
            .classify("How do laureates think about justice?")
            .unwrap();
        assert!(result
            .trace
            .iter()
            .any(|line| line.contains("synthesis frame 'laureates think'")));
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn confidence_grows_with_cue_count_but_stays_bounded() {
        let classifier = classifier();
        let one = classifier.classify("Who won in 1990?").unwrap();
        let many = classifier
            .classify("What themes, motifs and patterns recur in lectures?")
            .unwrap();
        assert!(many.confidence >= one.confidence);
        assert!(many.confidence <= 0.95);
    }
}
