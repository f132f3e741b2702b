//! UniVoice streaming pipeline.
//!
//! The orchestrator wires the ASR stream, the sentence combiner, the
//! two-tier translation queue, the realtime display, the history grouper,
//! and the advanced-features scheduler into a single typed event stream.
//! All orchestration state is owned by one reactor task; only the queue's
//! bounded worker pool and the long-lived ASR stream run concurrently.

pub mod combiner;
pub mod display;
pub mod features;
pub mod history;
pub mod orchestrator;
pub mod queue;
pub mod state;

pub use combiner::{CombinerConfig, SentenceCombiner};
pub use display::DisplaySync;
pub use features::{FeatureScheduler, ThresholdTracker};
pub use history::{HistoryConfig, HistoryGrouper};
pub use orchestrator::{AsrSink, AsrSource, LiveAsrSource, Pipeline, PipelineDeps, PipelineHandle};
pub use queue::{QueueConfig, Translated, TranslationHandler, TranslationQueue};
pub use state::{StateMachine, TransitionRecord};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] univoice_core::Error),

    #[error("LLM error: {0}")]
    Llm(#[from] univoice_llm::LlmError),

    #[error("store error: {0}")]
    Store(#[from] univoice_store::StoreError),

    #[error("pipeline worker unavailable")]
    WorkerGone,
}

impl PipelineError {
    /// Flatten into the wire taxonomy for `error` events.
    pub fn into_core(self) -> univoice_core::Error {
        match self {
            PipelineError::Core(e) => e,
            PipelineError::Llm(e) => e.into(),
            PipelineError::Store(e) => e.into(),
            PipelineError::WorkerGone => {
                univoice_core::Error::TranslationFailed("pipeline worker unavailable".into())
            }
        }
    }
}
