//! Durable history, summary, vocabulary, and report types.

use serde::{Deserialize, Serialize};

/// A sentence row inside a history block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceEntry {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
}

/// A display block of grouped sentences. Composition is stable once emitted;
/// only the sentence targets may be upgraded in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBlock {
    pub id: String,
    pub sentences: Vec<SentenceEntry>,
    /// Unix epoch milliseconds.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph_id: Option<String>,
    /// Pre-upgrade target texts joined, retained when paragraph-mode diffing
    /// is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_paragraph: bool,
}

/// A progressive or on-demand summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    pub word_count: usize,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    /// The word-count threshold that triggered this summary, when progressive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    /// Media-time range covered, (start_ms, end_ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    /// UTF-8 markdown.
    pub report: String,
    pub total_word_count: usize,
    pub summary_count: usize,
    pub vocabulary_count: usize,
}
