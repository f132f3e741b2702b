//! Microphone capture and framing.
//!
//! The capture callback runs on the OS audio thread and only pushes samples
//! into a lock-free ring buffer; a dedicated framer thread drains the ring,
//! resamples to 16 kHz mono, encodes PCM16 LE, and emits fixed 640-byte
//! (20 ms) frames in arrival order. Pause stops delivery without closing
//! the device.

pub mod capture;
pub mod framer;

pub use capture::{AudioCapture, CaptureConfig};
pub use framer::FrameAssembler;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoDevice,

    #[error("device error: {0}")]
    Device(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("unsupported device format: {0}")]
    Unsupported(String),
}

impl From<AudioError> for univoice_core::Error {
    fn from(err: AudioError) -> Self {
        univoice_core::Error::AudioCaptureFailed(err.to_string())
    }
}
