//! The pipeline event union and its wire envelope.
//!
//! Every event published by the orchestrator is wrapped in an envelope
//! carrying the session correlation id and a wall-clock timestamp, then
//! validated against the IPC schema before crossing the process boundary.
//! Both ends reject unknown variants.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::history::VocabularyItem;
use crate::language::Language;

/// Authoritative pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Starting,
    Listening,
    Processing,
    Stopping,
    Error,
    Paused,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Starting => "starting",
            PipelineState::Listening => "listening",
            PipelineState::Processing => "processing",
            PipelineState::Stopping => "stopping",
            PipelineState::Error => "error",
            PipelineState::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrPayload {
    pub text: String,
    pub confidence: f64,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationPayload {
    pub source_text: String,
    pub target_text: String,
    pub source_language: Language,
    pub target_language: Language,
    pub confidence: f64,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPayload {
    pub segment_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    pub status: SegmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSentencePayload {
    pub combined_id: String,
    pub segment_ids: Vec<String>,
    pub source_text: String,
    pub timestamp: u64,
    pub end_timestamp: u64,
    pub segment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveSummaryPayload {
    pub source_text: String,
    pub target_text: String,
    pub source_language: Language,
    pub target_language: Language,
    pub word_count: usize,
    pub threshold: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphCompletePayload {
    pub paragraph_id: String,
    pub segment_ids: Vec<String>,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub duration: u64,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub state: PipelineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyPayload {
    pub items: Vec<VocabularyItem>,
    pub total_terms: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReportPayload {
    pub report: String,
    pub total_word_count: usize,
    pub summary_count: usize,
    pub vocabulary_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            details: None,
        }
    }
}

/// Everything the pipeline publishes, as one tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PipelineEvent {
    Asr(AsrPayload),
    Translation(TranslationPayload),
    Segment(SegmentPayload),
    CombinedSentence(CombinedSentencePayload),
    ProgressiveSummary(ProgressiveSummaryPayload),
    ParagraphComplete(ParagraphCompletePayload),
    Status(StatusPayload),
    Vocabulary(VocabularyPayload),
    FinalReport(FinalReportPayload),
    Error(ErrorPayload),
}

impl PipelineEvent {
    /// The wire tag, matching the serialized `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Asr(_) => "asr",
            PipelineEvent::Translation(_) => "translation",
            PipelineEvent::Segment(_) => "segment",
            PipelineEvent::CombinedSentence(_) => "combinedSentence",
            PipelineEvent::ProgressiveSummary(_) => "progressiveSummary",
            PipelineEvent::ParagraphComplete(_) => "paragraphComplete",
            PipelineEvent::Status(_) => "status",
            PipelineEvent::Vocabulary(_) => "vocabulary",
            PipelineEvent::FinalReport(_) => "finalReport",
            PipelineEvent::Error(_) => "error",
        }
    }
}

/// Wire envelope: `{ type, timestamp, correlation_id, data }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: PipelineEvent,
    /// Unix epoch milliseconds at publication.
    pub timestamp: u64,
    /// Session correlation id stamped on every event.
    pub correlation_id: String,
}

impl EventEnvelope {
    pub fn new(event: PipelineEvent, correlation_id: impl Into<String>) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self {
            event,
            timestamp,
            correlation_id: correlation_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let envelope = EventEnvelope::new(
            PipelineEvent::Status(StatusPayload {
                state: PipelineState::Listening,
                details: None,
            }),
            "corr-1",
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["data"]["state"], "listening");
        assert_eq!(json["correlation_id"], "corr-1");
        assert!(json["timestamp"].is_u64());
    }

    #[test]
    fn unknown_variant_rejected() {
        let raw = r#"{"type":"telemetry","data":{},"timestamp":1,"correlation_id":"x"}"#;
        assert!(serde_json::from_str::<EventEnvelope>(raw).is_err());
    }

    #[test]
    fn round_trips_translation_event() {
        let envelope = EventEnvelope::new(
            PipelineEvent::Translation(TranslationPayload {
                source_text: "Hello world.".into(),
                target_text: "こんにちは世界。".into(),
                source_language: Language::parse("en").unwrap(),
                target_language: Language::parse("ja").unwrap(),
                confidence: 0.9,
                is_final: true,
                segment_id: Some("asr_1".into()),
            }),
            "corr-2",
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
