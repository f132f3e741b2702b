//! Core types for the UniVoice lecture-translation pipeline
//!
//! This crate provides the foundational types used across all other crates:
//! - Transcript, sentence, and translation data model
//! - Display and history view types
//! - The pipeline event union and IPC command set
//! - Error taxonomy with wire codes
//! - PCM16 audio frames

pub mod audio;
pub mod command;
pub mod display;
pub mod error;
pub mod event;
pub mod history;
pub mod language;
pub mod segment;
pub mod session;
pub mod translation;

pub use audio::{AudioFrame, Channels, SampleRate};
pub use command::IpcCommand;
pub use display::{DisplayPair, DisplayPosition, DisplaySnapshot, DisplayText};
pub use error::{Error, Result};
pub use event::{
    AsrPayload, CombinedSentencePayload, ErrorPayload, EventEnvelope, FinalReportPayload,
    ParagraphCompletePayload, PipelineEvent, PipelineState, ProgressiveSummaryPayload,
    SegmentPayload, SegmentStatus, StatusPayload, TranslationPayload, VocabularyPayload,
};
pub use history::{FinalReport, HistoryBlock, SentenceEntry, Summary, VocabularyItem};
pub use language::Language;
pub use segment::{CombinedSentence, TranscriptSegment};
pub use session::{SessionMetadata, SessionRecord};
pub use translation::{
    TranslationKind, TranslationPriority, TranslationRequest, TranslationResult,
};

/// Fallback caption prefix used when a realtime translation times out.
///
/// The full fallback target is this string, a newline, then the source text.
pub const TRANSLATION_FALLBACK_NOTICE: &str = "translation unavailable; original shown";
