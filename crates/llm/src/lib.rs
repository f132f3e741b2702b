//! LLM gateway.
//!
//! One HTTP backend serves every model-backed feature; callers pick a
//! [`univoice_config::ModelPurpose`] and the configured table decides which
//! model and effort tier answers. Streaming deltas flow through an mpsc
//! channel owned by the caller.

pub mod gateway;
pub mod prompts;

pub use gateway::{ChatGateway, Completion, GenerateRequest, LlmGateway};
pub use prompts::PromptBuilder;

use thiserror::Error;

/// LLM errors.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for univoice_core::Error {
    fn from(err: LlmError) -> Self {
        univoice_core::Error::TranslationFailed(err.to_string())
    }
}
