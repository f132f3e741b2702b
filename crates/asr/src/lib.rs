//! Streaming ASR client.
//!
//! Opens a duplex WebSocket to the recognition service, pushes PCM16 frames
//! unmodified, and normalizes inbound messages into `TranscriptSegment`
//! events. The client never reconnects on its own; connection loss surfaces
//! as an `Error` event and recovery is the orchestrator's policy.

pub mod client;
pub mod config;
pub mod messages;

pub use client::{AsrClient, AsrEvent, AsrStream};
pub use config::AsrLiveConfig;

use thiserror::Error;

/// ASR-layer errors. Conversion to the pipeline taxonomy happens at the
/// orchestrator via [`AsrError::into_pipeline_error`].
#[derive(Debug, Error)]
pub enum AsrError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication rejected")]
    Auth,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("stream closed: {0}")]
    StreamClosed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client already disconnected")]
    Disconnected,
}

impl AsrError {
    pub fn into_pipeline_error(self) -> univoice_core::Error {
        match self {
            AsrError::Connection(msg) => univoice_core::Error::AsrConnectionFailed(msg),
            AsrError::Auth => {
                univoice_core::Error::AsrConnectionFailed("authentication rejected".into())
            }
            AsrError::RateLimited(msg) => univoice_core::Error::AsrRateLimited(msg),
            AsrError::StreamClosed(msg) => univoice_core::Error::AsrStreamClosed(msg),
            AsrError::Protocol(msg) => univoice_core::Error::AsrStreamClosed(msg),
            AsrError::Disconnected => {
                univoice_core::Error::AsrStreamClosed("already disconnected".into())
            }
        }
    }
}
