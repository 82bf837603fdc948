//! Sub-classification of thematic queries. The subtype picks the prompt
//! template and the retrieval sizing profile downstream.

use serde::{Deserialize, Serialize};

use crate::classifier::matches_synthesis_frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThematicSubtype {
    /// "How do laureates think about X": merge many voices into one view.
    Synthesis,
    /// "List/which/show …": enumerate passages on a theme.
    Enumerative,
    /// "Compare/contrast/differ/vs": set voices against each other.
    Analytical,
    /// "What/how …" with a theme and no stronger cue.
    Exploratory,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtypeDetection {
    pub subtype: ThematicSubtype,
    pub confidence: f32,
    pub cues: Vec<String>,
}

const ENUMERATIVE_CUES: &[&str] = &["list", "which", "show"];
const ANALYTICAL_CUES: &[&str] = &["compare", "contrast", "differ", "versus"];
const THEME_WORDS: &[&str] = &["theme", "themes", "motif", "motifs", "pattern", "patterns", "topic", "topics"];

fn word_hit(haystack: &str, needle: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == needle)
}

/// Detect the thematic subtype. Applies only to queries already classified
/// as thematic; candidates are scored by cue count and ties resolve in the
/// declaration order of [`ThematicSubtype`].
pub fn detect_subtype(query: &str) -> SubtypeDetection {
    let lower = query.to_lowercase();
    let has_theme_word = THEME_WORDS.iter().any(|w| word_hit(&lower, w));

    let mut candidates: Vec<(ThematicSubtype, Vec<String>)> = Vec::new();

    if let Some(frame) = matches_synthesis_frame(&lower) {
        candidates.push((ThematicSubtype::Synthesis, vec![frame]));
    }

    let enumerative: Vec<String> = ENUMERATIVE_CUES
        .iter()
        .filter(|cue| word_hit(&lower, cue))
        .map(|cue| (*cue).to_string())
        .collect();
    if !enumerative.is_empty() && has_theme_word {
        candidates.push((ThematicSubtype::Enumerative, enumerative));
    }

    let mut analytical: Vec<String> = ANALYTICAL_CUES
        .iter()
        .filter(|cue| word_hit(&lower, cue))
        .map(|cue| (*cue).to_string())
        .collect();
    if lower.contains(" vs ") || lower.contains(" vs.") {
        analytical.push("vs".to_string());
    }
    if !analytical.is_empty() {
        candidates.push((ThematicSubtype::Analytical, analytical));
    }

    if (word_hit(&lower, "what") || word_hit(&lower, "how")) && has_theme_word {
        candidates.push((
            ThematicSubtype::Exploratory,
            vec!["what/how + theme".to_string()],
        ));
    }

    // Highest cue count wins; stable ordering means earlier (stronger)
    // subtypes win ties.
    let best = candidates
        .into_iter()
        .enumerate()
        .max_by(|(a_idx, (_, a_cues)), (b_idx, (_, b_cues))| {
            a_cues
                .len()
                .cmp(&b_cues.len())
                .then_with(|| b_idx.cmp(a_idx))
        })
        .map(|(_, candidate)| candidate);

    match best {
        Some((subtype, cues)) => {
            let confidence = (0.6 + 0.1 * cues.len() as f32).min(0.9);
            SubtypeDetection {
                subtype,
                confidence,
                cues,
            }
        }
        // Thematic with no sharper cue reads as open exploration.
        None => SubtypeDetection {
            subtype: ThematicSubtype::Exploratory,
            confidence: 0.4,
            cues: Vec::new(),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_frame_wins() {
        let detection = detect_subtype("How do laureates think about justice?");
        assert_eq!(detection.subtype, ThematicSubtype::Synthesis);
        assert!(detection.cues.iter().any(|c| c == "laureates think"));
    }

    #[test]
    fn enumerative_needs_cue_and_theme() {
        let detection = detect_subtype("List the themes in Nobel lectures");
        assert_eq!(detection.subtype, ThematicSubtype::Enumerative);

        // "list" without a theme word is not enumerative.
        let detection = detect_subtype("list laureates that compare exile and home");
        assert_eq!(detection.subtype, ThematicSubtype::Analytical);
    }

    #[test]
    fn analytical_from_comparison_words() {
        let detection = detect_subtype("Compare speeches from U.S. vs. European laureates");
        assert_eq!(detection.subtype, ThematicSubtype::Analytical);
        assert!(detection.cues.len() >= 2);
    }

    #[test]
    fn exploratory_for_plain_theme_questions() {
        let detection = detect_subtype("What themes are present in Nobel lectures?");
        assert_eq!(detection.subtype, ThematicSubtype::Exploratory);
    }

    #[test]
    fn synthesis_beats_exploratory_on_tied_cue_counts() {
        // Fires both the synthesis frame (one cue) and what/how + theme
        // (one cue); the tie resolves to synthesis.
        let detection = detect_subtype("How do winners explore themes of exile?");
        assert_eq!(detection.subtype, ThematicSubtype::Synthesis);
    }

    #[test]
    fn default_is_low_confidence_exploratory() {
        let detection = detect_subtype("voices of conscience across the century");
        assert_eq!(detection.subtype, ThematicSubtype::Exploratory);
        assert!(detection.cues.is_empty());
        assert!(detection.confidence < 0.5);
    }
}
