//! Prompt assembly: one static template per (intent, subtype), a context
//! block built from retrieved chunks in rank order, and a token budget that
//! drops the lowest-ranked chunks when the context overflows.

use serde::Serialize;

use laureate_intent::{Intent, ThematicSubtype};
use laureate_retrieval::RetrievedChunk;

/// Default whole-prompt token budget.
pub const DEFAULT_TOKEN_BUDGET: usize = 3_000;

/// Words-to-tokens heuristic used when no tokenizer is wired in.
const TOKENS_PER_WORD: f32 = 1.3;

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system_preface: &'static str,
    pub task_instruction: &'static str,
    pub style_constraints: &'static str,
}

const FACTUAL_RAG: PromptTemplate = PromptTemplate {
    name: "factual_rag",
    system_preface: "You are an assistant answering questions about Nobel Prize in Literature laureates using only the provided passages from their lectures and speeches.",
    task_instruction: "Answer the question directly and concisely, citing the speaker and year for any claim drawn from a passage.",
    style_constraints: "If the passages do not contain the answer, say so plainly. Do not invent facts.",
};

const THEMATIC_SYNTHESIS: PromptTemplate = PromptTemplate {
    name: "thematic_synthesis",
    system_preface: "You are a literary analyst synthesizing how Nobel laureates in Literature treat a theme across their lectures and speeches.",
    task_instruction: "Weave the passages into a single coherent account of how the laureates, collectively, approach the theme. Name the speakers whose words you draw on.",
    style_constraints: "Ground every observation in the passages. Prefer quotation fragments over paraphrase when a phrase is striking.",
};

const THEMATIC_ENUMERATIVE: PromptTemplate = PromptTemplate {
    name: "thematic_enumerative",
    system_preface: "You are a literary analyst cataloguing where Nobel laureates in Literature touch a theme.",
    task_instruction: "List the relevant laureates and, for each, summarize in one or two sentences what their passage says about the theme, with the year.",
    style_constraints: "One list item per laureate. Stay within the passages; omit laureates the passages do not support.",
};

const THEMATIC_ANALYTICAL: PromptTemplate = PromptTemplate {
    name: "thematic_analytical",
    system_preface: "You are a literary analyst comparing how different Nobel laureates in Literature treat a theme.",
    task_instruction: "Contrast the perspectives in the passages: where the laureates agree, where they diverge, and how their framing differs. Attribute every position to its speaker.",
    style_constraints: "Organize by point of comparison, not by speaker. Ground every claim in a passage.",
};

const THEMATIC_EXPLORATORY: PromptTemplate = PromptTemplate {
    name: "thematic_exploratory",
    system_preface: "You are a literary guide exploring what Nobel laureates in Literature have said around a topic.",
    task_instruction: "Give an overview of what the passages reveal about the topic, highlighting the most evocative moments and who spoke them.",
    style_constraints: "Stay within the passages. Keep the tone curious rather than conclusive.",
};

const GENERATIVE: PromptTemplate = PromptTemplate {
    name: "generative",
    system_preface: "You are a writer composing new text in the voice of Nobel Prize in Literature laureates, informed by passages from their actual lectures and speeches.",
    task_instruction: "Fulfill the user's writing request. Let the cadence, imagery, and concerns of the passages shape the result.",
    style_constraints: "Do not copy the passages verbatim; echo their voice. Clearly fictional content is fine, but never present it as a real quotation.",
};

/// Template lookup. Thematic intent consults the subtype; factual and
/// generative each have one template.
pub fn template_for(intent: Intent, subtype: Option<ThematicSubtype>) -> &'static PromptTemplate {
    match intent {
        Intent::Factual => &FACTUAL_RAG,
        Intent::Generative => &GENERATIVE,
        Intent::Thematic => match subtype.unwrap_or(ThematicSubtype::Exploratory) {
            ThematicSubtype::Synthesis => &THEMATIC_SYNTHESIS,
            ThematicSubtype::Enumerative => &THEMATIC_ENUMERATIVE,
            ThematicSubtype::Analytical => &THEMATIC_ANALYTICAL,
            ThematicSubtype::Exploratory => &THEMATIC_EXPLORATORY,
        },
    }
}

/// Estimate tokens from whitespace-separated words.
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f32 * TOKENS_PER_WORD).ceil() as usize
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedPrompt {
    pub template_name: String,
    pub text: String,
    pub context_char_length: usize,
    /// How many of the offered chunks survived the token budget.
    pub chunks_used: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    token_budget: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }
}

impl PromptBuilder {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    /// Render the prompt. Chunks are inserted in rank order; when the total
    /// estimate exceeds the budget, lowest-ranked chunks are dropped first.
    pub fn build(
        &self,
        template: &PromptTemplate,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> RenderedPrompt {
        let mut take = chunks.len();
        loop {
            let context = format_context(&chunks[..take]);
            let text = render(template, query, &context);
            if take == 0 || estimate_tokens(&text) <= self.token_budget {
                if take < chunks.len() {
                    tracing::debug!(
                        offered = chunks.len(),
                        kept = take,
                        budget = self.token_budget,
                        "context trimmed to fit the prompt budget"
                    );
                }
                return RenderedPrompt {
                    template_name: template.name.to_string(),
                    text,
                    context_char_length: context.chars().count(),
                    chunks_used: take,
                };
            }
            take -= 1;
        }
    }
}

fn render(template: &PromptTemplate, query: &str, context: &str) -> String {
    let context_block = if context.is_empty() {
        "(no passages)".to_string()
    } else {
        context.to_string()
    };
    format!(
        "{preface}\n\n{task}\n\nCONTEXT PASSAGES:\n{context}\n\nUSER QUERY:\n{query}\n\n{style}",
        preface = template.system_preface,
        task = template.task_instruction,
        context = context_block,
        query = query,
        style = template.style_constraints,
    )
}

/// Format chunks as `Speaker (year, source): text` lines in rank order,
/// suppressing a header identical to the previous chunk's.
fn format_context(chunks: &[RetrievedChunk]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(chunks.len());
    let mut previous_header: Option<String> = None;
    for chunk in chunks {
        let header = format!(
            "{} ({}, {})",
            chunk.chunk.laureate,
            chunk.chunk.year_awarded,
            chunk.chunk.source_type.label()
        );
        if previous_header.as_deref() == Some(header.as_str()) {
            lines.push(format!("  {}", chunk.chunk.text));
        } else {
            lines.push(format!("{header}:\n  {}", chunk.chunk.text));
            previous_header = Some(header);
        }
    }
    lines.join("\n")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use laureate_store::{ChunkRecord, SourceType};

    fn retrieved(id: &str, laureate: &str, year: u32, text: &str, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk: ChunkRecord {
                chunk_id: id.to_string(),
                source_type: SourceType::NobelLecture,
                chunk_index: 0,
                text: text.to_string(),
                laureate: laureate.to_string(),
                year_awarded: year,
                country: String::new(),
                gender: String::new(),
                category: "Literature".to_string(),
            },
            score: 0.9,
            rank,
            source_term: None,
        }
    }

    #[test]
    fn every_intent_and_subtype_selects_a_template() {
        assert_eq!(template_for(Intent::Factual, None).name, "factual_rag");
        assert_eq!(template_for(Intent::Generative, None).name, "generative");
        assert_eq!(
            template_for(Intent::Thematic, Some(ThematicSubtype::Synthesis)).name,
            "thematic_synthesis"
        );
        assert_eq!(
            template_for(Intent::Thematic, Some(ThematicSubtype::Enumerative)).name,
            "thematic_enumerative"
        );
        assert_eq!(
            template_for(Intent::Thematic, Some(ThematicSubtype::Analytical)).name,
            "thematic_analytical"
        );
        assert_eq!(
            template_for(Intent::Thematic, None).name,
            "thematic_exploratory"
        );
    }

    #[test]
    fn context_appears_in_rank_order_with_headers() {
        let chunks = vec![
            retrieved("c1", "Toni Morrison", 1993, "Word-work is sublime.", 0),
            retrieved("c2", "Seamus Heaney", 1995, "I credit poetry.", 1),
        ];
        let rendered = PromptBuilder::default().build(
            template_for(Intent::Thematic, Some(ThematicSubtype::Synthesis)),
            "how do laureates think about language",
            &chunks,
        );
        let morrison = rendered.text.find("Toni Morrison (1993, Nobel lecture):").unwrap();
        let heaney = rendered.text.find("Seamus Heaney (1995, Nobel lecture):").unwrap();
        assert!(morrison < heaney);
        assert!(rendered.text.contains("USER QUERY:\nhow do laureates think about language"));
        assert_eq!(rendered.chunks_used, 2);
    }

    #[test]
    fn consecutive_identical_headers_are_deduplicated() {
        let chunks = vec![
            retrieved("c1", "Toni Morrison", 1993, "First passage.", 0),
            retrieved("c2", "Toni Morrison", 1993, "Second passage.", 1),
            retrieved("c3", "Seamus Heaney", 1995, "Third passage.", 2),
        ];
        let context = format_context(&chunks);
        assert_eq!(context.matches("Toni Morrison (1993, Nobel lecture):").count(), 1);
        assert!(context.contains("Second passage."));
        assert!(context.contains("Seamus Heaney (1995, Nobel lecture):"));
    }

    #[test]
    fn overflow_drops_lowest_ranked_chunks() {
        let long_text = "word ".repeat(400);
        let chunks: Vec<RetrievedChunk> = (0..10)
            .map(|i| retrieved(&format!("c{i}"), "Toni Morrison", 1993, &long_text, i))
            .collect();

        let rendered = PromptBuilder::new(1_000).build(
            template_for(Intent::Factual, None),
            "what did morrison say",
            &chunks,
        );
        // The budget forces trimming, the estimate lands under it, and the
        // survivors are a prefix of the ranked list, never a mid-list cut.
        assert!(rendered.chunks_used < 10);
        assert!(rendered.chunks_used >= 1);
        assert!(estimate_tokens(&rendered.text) <= 1_000);
    }

    #[test]
    fn zero_chunks_still_renders_a_prompt() {
        let rendered = PromptBuilder::default().build(
            template_for(Intent::Generative, None),
            "write a speech about teaching",
            &[],
        );
        assert!(rendered.text.contains("(no passages)"));
        assert_eq!(rendered.context_char_length, 0);
        assert_eq!(rendered.chunks_used, 0);
    }

    #[test]
    fn token_estimate_uses_the_word_heuristic() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three four"), 6); // 4 × 1.3 = 5.2 → 6
        assert_eq!(estimate_tokens("ten words of plain text should estimate to thirteen tokens"), 13);
    }

    #[test]
    fn context_char_length_counts_the_context_only() {
        let chunks = vec![retrieved("c1", "Toni Morrison", 1993, "Short.", 0)];
        let rendered = PromptBuilder::default().build(
            template_for(Intent::Factual, None),
            "q",
            &chunks,
        );
        let expected = format_context(&chunks).chars().count();
        assert_eq!(rendered.context_char_length, expected);
    }
}
