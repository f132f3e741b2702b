//! Transcript segments and combined sentences.

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// One unit of speech returned by the ASR stream.
///
/// Interim updates share an `id` and may grow `text`; once `is_final` is
/// observed for an id, no further interim updates are accepted for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Unique per segment, `asr_<monotonic>`.
    pub id: String,
    pub text: String,
    pub is_final: bool,
    /// 0..1 from the recognizer.
    pub confidence: f64,
    /// Monotonic media time of the segment start.
    pub start_ms: u64,
    /// Monotonic media time of the segment end.
    pub end_ms: u64,
    pub language: Language,
}

impl TranscriptSegment {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One or more finalized segments merged into a sentence-level unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedSentence {
    /// `combined_<monotonic>`.
    pub id: String,
    /// Ordered ids of the final segments composing this sentence.
    pub segment_ids: Vec<String>,
    /// Segment texts joined with single spaces, trimmed.
    pub source_text: String,
    /// Start of the first segment.
    pub start_ms: u64,
    /// End of the last segment.
    pub end_ms: u64,
    pub segment_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_json_shape() {
        let seg = TranscriptSegment {
            id: "asr_1".into(),
            text: "Hello world.".into(),
            is_final: true,
            confidence: 0.97,
            start_ms: 120,
            end_ms: 840,
            language: Language::parse("en").unwrap(),
        };
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["id"], "asr_1");
        assert_eq!(json["is_final"], true);
        assert_eq!(json["language"], "en");
    }
}
