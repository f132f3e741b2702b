//! Wire message parsing and segment normalization.
//!
//! The provider's realtime protocol delivers JSON text frames; binary frames
//! never arrive inbound. Messages outside the known set are ignored with a
//! debug log rather than failing the stream.

use serde::Deserialize;

use univoice_core::{Language, TranscriptSegment};

/// Inbound messages, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    Results(ResultsMessage),
    UtteranceEnd(UtteranceEndMessage),
    Metadata(MetadataMessage),
    Error(ErrorMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    pub channel: ResultsChannel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    /// Stream-relative start, seconds.
    #[serde(default)]
    pub start: f64,
    /// Window duration, seconds.
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsChannel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtteranceEndMessage {
    /// End of the last spoken word, seconds.
    #[serde(default)]
    pub last_word_end: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataMessage {
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub code: String,
}

/// Assigns stable segment ids across interim -> final updates.
///
/// Interim results for the current window share one `asr_<n>` id; the final
/// result seals that id and advances the counter, so a given id is observed
/// final exactly once.
#[derive(Debug)]
pub struct SegmentTracker {
    language: Language,
    next: u64,
    open: Option<String>,
}

impl SegmentTracker {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            next: 1,
            open: None,
        }
    }

    /// Normalize a `Results` message. Returns `None` for windows with an
    /// empty transcript (silence keep-alives).
    pub fn normalize(&mut self, msg: &ResultsMessage) -> Option<TranscriptSegment> {
        let alternative = msg.channel.alternatives.first()?;
        if alternative.transcript.trim().is_empty() {
            // A final for an empty window still closes the open segment id.
            if msg.is_final {
                self.open = None;
            }
            return None;
        }

        let id = match &self.open {
            Some(id) => id.clone(),
            None => {
                let id = format!("asr_{}", self.next);
                self.open = Some(id.clone());
                id
            }
        };

        let start_ms = (msg.start * 1000.0).round().max(0.0) as u64;
        let end_ms = ((msg.start + msg.duration) * 1000.0).round().max(0.0) as u64;

        if msg.is_final {
            self.open = None;
            self.next += 1;
        }

        Some(TranscriptSegment {
            id,
            text: alternative.transcript.trim().to_string(),
            is_final: msg.is_final,
            confidence: alternative.confidence,
            start_ms,
            end_ms,
            language: self.language.clone(),
        })
    }
}
