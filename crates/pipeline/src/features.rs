//! Advanced features scheduler: progressive summaries, vocabulary, report.
//!
//! Triggered by the running word count of finalized source text. Each
//! crossed threshold yields one summary (generated in the source language,
//! then translated); vocabulary and the final report are on-demand. All
//! three share the LLM gateway with the translation tiers but resolve their
//! models through the purpose table.

use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use univoice_config::{constants, ModelPurpose, ModelTable};
use univoice_core::{FinalReport, Language, Summary, VocabularyItem};
use univoice_llm::{GenerateRequest, LlmGateway, PromptBuilder};

use crate::PipelineError;

/// Counts crossed word-count thresholds; each threshold fires exactly once.
#[derive(Debug, Default)]
pub struct ThresholdTracker {
    crossed: usize,
}

impl ThresholdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thresholds newly crossed by the running total, in order.
    pub fn update(&mut self, total_words: usize) -> Vec<usize> {
        let mut fired = Vec::new();
        loop {
            let next = constants::summary::threshold_at(self.crossed);
            if total_words < next {
                break;
            }
            fired.push(next);
            self.crossed += 1;
        }
        fired
    }

    pub fn crossed_count(&self) -> usize {
        self.crossed
    }

    /// Seed the tracker after a session resume so already-emitted thresholds
    /// do not fire again.
    pub fn resume_at(&mut self, emitted: usize) {
        self.crossed = emitted;
    }
}

/// Word counting for threshold tracking. Unicode word boundaries handle
/// Latin scripts; for CJK text (few UAX-29 word breaks) the grapheme count
/// divided by two approximates the word mass so thresholds still advance.
pub fn count_words(text: &str) -> usize {
    let words = text.unicode_words().count();
    if words > 0 {
        return words;
    }
    text.graphemes(true).filter(|g| !g.trim().is_empty()).count() / 2
}

pub struct FeatureScheduler {
    gateway: Arc<dyn LlmGateway>,
    models: ModelTable,
    prompts: PromptBuilder,
    source_language: Language,
    target_language: Language,
}

impl FeatureScheduler {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        models: ModelTable,
        source_language: Language,
        target_language: Language,
    ) -> Self {
        Self {
            gateway,
            models,
            prompts: PromptBuilder::new(source_language.clone(), target_language.clone()),
            source_language,
            target_language,
        }
    }

    pub fn languages(&self) -> (&Language, &Language) {
        (&self.source_language, &self.target_language)
    }

    /// Generate the summary for one crossed threshold: source-language
    /// summary first, then its translation (skipped when the pair matches).
    pub async fn generate_progressive_summary(
        &self,
        threshold: usize,
        word_count: usize,
        transcript: &str,
        time_range: Option<(u64, u64)>,
    ) -> Result<Summary, PipelineError> {
        let spec = self.models.resolve(ModelPurpose::Summary);

        let source = self
            .gateway
            .generate(GenerateRequest::new(
                spec.clone(),
                self.prompts.summary_system(),
                self.prompts.summary_user(transcript),
            ))
            .await?
            .text
            .trim()
            .to_string();

        let target = if self.source_language == self.target_language {
            source.clone()
        } else {
            self.gateway
                .generate(GenerateRequest::new(
                    spec,
                    self.prompts.summary_translation_system(),
                    source.clone(),
                ))
                .await?
                .text
                .trim()
                .to_string()
        };

        Ok(Summary {
            id: format!("summary_{threshold}"),
            source_text: source,
            target_text: target,
            word_count,
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            threshold: Some(threshold),
            time_range,
        })
    }

    /// Extract 5-15 domain terms from the transcript.
    pub async fn generate_vocabulary(
        &self,
        transcript: &str,
    ) -> Result<Vec<VocabularyItem>, PipelineError> {
        let spec = self.models.resolve(ModelPurpose::Vocabulary);
        let completion = self
            .gateway
            .generate(GenerateRequest::new(
                spec,
                self.prompts.vocabulary_system(
                    constants::vocabulary::MIN_TERMS,
                    constants::vocabulary::MAX_TERMS,
                ),
                self.prompts.vocabulary_user(transcript),
            ))
            .await?;

        let items = univoice_llm::prompts::parse_vocabulary(
            &completion.text,
            constants::vocabulary::MIN_TERMS,
            constants::vocabulary::MAX_TERMS,
        )?;
        Ok(items)
    }

    /// Consolidate history and summaries into the long-form report.
    pub async fn generate_final_report(
        &self,
        transcript: &str,
        summaries: &[Summary],
        vocabulary_count: usize,
        total_word_count: usize,
    ) -> Result<FinalReport, PipelineError> {
        let spec = self.models.resolve(ModelPurpose::FinalReport);
        let summary_texts: Vec<String> =
            summaries.iter().map(|s| s.source_text.clone()).collect();

        let completion = self
            .gateway
            .generate(GenerateRequest::new(
                spec,
                self.prompts.report_system(),
                self.prompts.report_user(transcript, &summary_texts),
            ))
            .await?;

        Ok(FinalReport {
            report: completion.text.trim().to_string(),
            total_word_count,
            summary_count: summaries.len(),
            vocabulary_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_fire_once_each() {
        let mut tracker = ThresholdTracker::new();
        assert!(tracker.update(399).is_empty());
        assert_eq!(tracker.update(400), vec![400]);
        assert!(tracker.update(400).is_empty());
        assert!(tracker.update(799).is_empty());
        assert_eq!(tracker.update(800), vec![800]);
        assert_eq!(tracker.update(1650), vec![1600]);
        assert_eq!(tracker.update(2400), vec![2400]);
        assert_eq!(tracker.update(3200), vec![3200]);
    }

    #[test]
    fn jump_crosses_multiple_thresholds_in_order() {
        let mut tracker = ThresholdTracker::new();
        assert_eq!(tracker.update(1700), vec![400, 800, 1600]);
    }

    #[test]
    fn resume_skips_already_emitted() {
        let mut tracker = ThresholdTracker::new();
        tracker.resume_at(2);
        assert_eq!(tracker.update(1650), vec![1600]);
    }

    #[test]
    fn counts_latin_words() {
        assert_eq!(count_words("The quick brown fox."), 4);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn cjk_text_still_accumulates() {
        // No UAX-29 word breaks, but mass must be non-zero so thresholds advance.
        assert!(count_words("今日は天気がいいですね") > 0);
    }
}
