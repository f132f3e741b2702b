//! Translation requests and results.

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Scheduling priority. Realtime captions run at `Normal`; history-tier work
/// runs at `Low` so it can never delay live output; `High` is reserved for
/// direct user requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationPriority {
    High,
    Normal,
    Low,
}

/// What kind of text is being translated; selects the model tier and the
/// downstream routing of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationKind {
    Realtime,
    History,
    Paragraph,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Realtime segment id, `history_<combined_id>`, or `paragraph_<id>`.
    pub segment_id: String,
    pub source_text: String,
    pub source_language: Language,
    pub target_language: Language,
    pub priority: TranslationPriority,
    pub kind: TranslationKind,
}

impl TranslationRequest {
    pub fn is_same_language(&self) -> bool {
        self.source_language == self.target_language
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub segment_id: String,
    pub source_text: String,
    pub target_text: String,
    pub is_final: bool,
    pub confidence: f64,
    /// Milliseconds from enqueue to the first streamed delta.
    pub first_paint_ms: u64,
    /// Milliseconds from enqueue to the terminal result.
    pub complete_ms: u64,
}

impl TranslationResult {
    /// Identity result for the same-language short-circuit: the source text
    /// is returned verbatim with full confidence and zero timings.
    pub fn identity(request: &TranslationRequest) -> Self {
        Self {
            segment_id: request.segment_id.clone(),
            source_text: request.source_text.clone(),
            target_text: request.source_text.clone(),
            is_final: true,
            confidence: 1.0,
            first_paint_ms: 0,
            complete_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(src: &str, dst: &str) -> TranslationRequest {
        TranslationRequest {
            segment_id: "s1".into(),
            source_text: "今日は天気がいい。".into(),
            source_language: Language::parse(src).unwrap(),
            target_language: Language::parse(dst).unwrap(),
            priority: TranslationPriority::Normal,
            kind: TranslationKind::Realtime,
        }
    }

    #[test]
    fn identity_result_copies_source() {
        let req = request("ja", "ja");
        assert!(req.is_same_language());
        let result = TranslationResult::identity(&req);
        assert_eq!(result.target_text, req.source_text);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.complete_ms, 0);
        assert!(result.is_final);
    }

    #[test]
    fn priority_orders_high_first() {
        assert!(TranslationPriority::High < TranslationPriority::Normal);
        assert!(TranslationPriority::Normal < TranslationPriority::Low);
    }
}
