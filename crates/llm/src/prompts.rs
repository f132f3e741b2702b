//! Prompt construction for every model-backed feature.
//!
//! Prompts are deliberately terse: realtime translation output is displayed
//! verbatim as a caption line, so the instructions forbid commentary.

use univoice_core::{Language, TranslationKind, VocabularyItem};

use crate::LlmError;

/// Builds prompts for a fixed language pair.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    source_language: Language,
    target_language: Language,
}

impl PromptBuilder {
    pub fn new(source_language: Language, target_language: Language) -> Self {
        Self {
            source_language,
            target_language,
        }
    }

    pub fn translation_system(&self, kind: TranslationKind) -> String {
        let base = format!(
            "You are a professional simultaneous interpreter. Translate the given {} text into {}.",
            self.source_language, self.target_language
        );
        match kind {
            TranslationKind::Realtime => format!(
                "{base} The text is a live lecture caption. Output only the translation, \
                 no commentary, no quotation marks. Prefer short natural phrasing."
            ),
            TranslationKind::History | TranslationKind::User => format!(
                "{base} Produce an accurate, well-formed translation. \
                 Output only the translation."
            ),
            TranslationKind::Paragraph => format!(
                "{base} The text is a full lecture paragraph assembled from live captions; \
                 smooth over recognition artifacts while staying faithful. \
                 Output only the translation."
            ),
        }
    }

    pub fn translation_user(&self, source_text: &str) -> String {
        source_text.to_string()
    }

    pub fn summary_system(&self) -> String {
        format!(
            "You summarize an ongoing lecture for a student. Write in {}. \
             Cover the main points made so far in 3-6 sentences. Output only the summary.",
            self.source_language
        )
    }

    pub fn summary_user(&self, transcript_so_far: &str) -> String {
        format!("Lecture transcript so far:\n\n{transcript_so_far}")
    }

    pub fn summary_translation_system(&self) -> String {
        format!(
            "Translate the following lecture summary from {} into {}. \
             Output only the translation.",
            self.source_language, self.target_language
        )
    }

    pub fn vocabulary_system(&self, min_terms: usize, max_terms: usize) -> String {
        format!(
            "Extract {min_terms}-{max_terms} domain-specific terms from the lecture transcript. \
             Respond with a JSON array only, each element \
             {{\"term\": ..., \"definition\": ..., \"context\": ...}}. \
             Definitions are written in {}; terms stay in {}.",
            self.target_language, self.source_language
        )
    }

    pub fn vocabulary_user(&self, transcript: &str) -> String {
        format!("Lecture transcript:\n\n{transcript}")
    }

    pub fn report_system(&self) -> String {
        format!(
            "You write a structured markdown report of a recorded lecture in {}. \
             Sections: overview, main topics with key points, terminology, conclusions. \
             Base the report only on the provided transcript and summaries. \
             Output markdown only.",
            self.target_language
        )
    }

    pub fn report_user(&self, transcript: &str, summaries: &[String]) -> String {
        let mut user = String::from("Lecture transcript:\n\n");
        user.push_str(transcript);
        if !summaries.is_empty() {
            user.push_str("\n\nProgressive summaries:\n");
            for (i, summary) in summaries.iter().enumerate() {
                user.push_str(&format!("\n[{}] {}\n", i + 1, summary));
            }
        }
        user
    }
}

/// Parse the vocabulary JSON contract, tolerating a markdown code fence and
/// clamping to `max_terms`. Fails if fewer than `min_terms` usable entries
/// come back.
pub fn parse_vocabulary(
    raw: &str,
    min_terms: usize,
    max_terms: usize,
) -> Result<Vec<VocabularyItem>, LlmError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    let mut items: Vec<VocabularyItem> = serde_json::from_str(body)
        .map_err(|e| LlmError::InvalidResponse(format!("vocabulary JSON: {e}")))?;
    items.retain(|item| !item.term.trim().is_empty() && !item.definition.trim().is_empty());

    if items.len() < min_terms {
        return Err(LlmError::InvalidResponse(format!(
            "vocabulary returned {} terms, need at least {min_terms}",
            items.len()
        )));
    }
    items.truncate(max_terms);
    Ok(items)
}
