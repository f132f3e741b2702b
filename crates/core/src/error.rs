//! Error taxonomy shared across the pipeline.
//!
//! Every variant maps to a stable wire code carried by `error` events, plus a
//! recoverability flag that tells the UI whether the session can continue.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline-wide error type.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Microphone device or permission failure; fatal to the current session.
    #[error("audio capture failed: {0}")]
    AudioCaptureFailed(String),

    /// The ASR endpoint could not be reached or rejected the connection.
    #[error("ASR connection failed: {0}")]
    AsrConnectionFailed(String),

    /// The ASR stream closed while the pipeline still expected results.
    #[error("ASR stream closed: {0}")]
    AsrStreamClosed(String),

    /// The ASR service applied rate limiting.
    #[error("ASR rate limited: {0}")]
    AsrRateLimited(String),

    /// A single translation exceeded its deadline.
    #[error("translation timed out after {elapsed_ms}ms for {segment_id}")]
    TranslationTimeout { segment_id: String, elapsed_ms: u64 },

    /// The LLM returned an error or an unusable response.
    #[error("translation failed: {0}")]
    TranslationFailed(String),

    /// The bounded queue rejected a request.
    #[error("translation queue full ({capacity} pending)")]
    TranslationQueueFull { capacity: usize },

    /// A disk write failed; the session continues in memory.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// A command arrived in a state that does not allow it.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A language tag was rejected.
    #[error("invalid language: {0}")]
    InvalidLanguage(String),

    /// An IPC message failed schema validation.
    #[error("schema validation failed: {0}")]
    SchemaValidationFailed(String),
}

impl Error {
    /// Stable wire code for `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::AudioCaptureFailed(_) => "audio_capture_failed",
            Error::AsrConnectionFailed(_) => "asr_connection_failed",
            Error::AsrStreamClosed(_) => "asr_stream_closed",
            Error::AsrRateLimited(_) => "asr_rate_limited",
            Error::TranslationTimeout { .. } => "translation_timeout",
            Error::TranslationFailed(_) => "translation_failed",
            Error::TranslationQueueFull { .. } => "translation_queue_full",
            Error::PersistenceFailed(_) => "persistence_failed",
            Error::InvalidStateTransition { .. } => "invalid_state_transition",
            Error::InvalidLanguage(_) => "invalid_language",
            Error::SchemaValidationFailed(_) => "schema_validation_failed",
        }
    }

    /// Whether the session can keep running after this error.
    ///
    /// Connection-level ASR errors are recoverable only through an explicit
    /// stop/start cycle; per-request translation errors recover locally via
    /// fallback text; programmer errors refuse the command and nothing else.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::AudioCaptureFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::TranslationTimeout {
                segment_id: "s1".into(),
                elapsed_ms: 10_000
            }
            .code(),
            "translation_timeout"
        );
        assert_eq!(
            Error::TranslationQueueFull { capacity: 100 }.code(),
            "translation_queue_full"
        );
        assert_eq!(Error::InvalidLanguage("zz!".into()).code(), "invalid_language");
    }

    #[test]
    fn capture_failure_is_fatal() {
        assert!(!Error::AudioCaptureFailed("no device".into()).is_recoverable());
        assert!(Error::AsrStreamClosed("eof".into()).is_recoverable());
    }
}
