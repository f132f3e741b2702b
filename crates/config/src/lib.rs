//! Configuration for the UniVoice pipeline.
//!
//! Settings are layered: `config/default.yaml`, then `config/{env}.yaml`,
//! then `UNIVOICE_*` environment variables. Service credentials are read
//! from the environment at process start and never written to disk.

pub mod constants;
pub mod models;
pub mod settings;

pub use models::{ModelPurpose, ModelSpec, ModelTable, ReasoningEffort};
pub use settings::{
    AsrSettings, FeatureFlags, PipelineSettings, RuntimeEnvironment, ServerSettings, Settings,
    StorageSettings, TranslationSettings, load_settings,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
