//! Main settings module.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants;
use crate::models::ModelTable;
use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub asr: AsrSettings,

    #[serde(default)]
    pub translation: TranslationSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub features: FeatureFlags,

    /// Purpose-keyed model table (§ model tiers).
    #[serde(default)]
    pub models: ModelTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    /// Capture the microphone in this process instead of receiving frames
    /// over the audio channel.
    #[serde(default)]
    pub local_capture: bool,
}

fn default_port() -> u16 {
    8765
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            local_capture: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrSettings {
    #[serde(default = "default_asr_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_asr_model")]
    pub model: String,
    /// Read from `UNIVOICE_ASR_API_KEY` at process start; never persisted.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u32,
    #[serde(default = "default_utterance_end_ms")]
    pub utterance_end_ms: u32,
    #[serde(default = "default_true")]
    pub interim_results: bool,
    #[serde(default = "default_true")]
    pub smart_format: bool,
    #[serde(default = "default_true")]
    pub no_delay: bool,
}

fn default_asr_endpoint() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_asr_model() -> String {
    "nova-3".to_string()
}

fn default_endpointing_ms() -> u32 {
    constants::asr::ENDPOINTING_MS
}

fn default_utterance_end_ms() -> u32 {
    constants::asr::UTTERANCE_END_MS
}

fn default_true() -> bool {
    true
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            endpoint: default_asr_endpoint(),
            model: default_asr_model(),
            api_key: std::env::var("UNIVOICE_ASR_API_KEY").ok(),
            endpointing_ms: default_endpointing_ms(),
            utterance_end_ms: default_utterance_end_ms(),
            interim_results: true,
            smart_format: true,
            no_delay: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Read from `UNIVOICE_LLM_API_KEY` at process start; never persisted.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_concurrency() -> usize {
    constants::queue::CONCURRENCY
}

fn default_queue_capacity() -> usize {
    constants::queue::CAPACITY
}

fn default_request_timeout_secs() -> u64 {
    constants::queue::HARD_TIMEOUT_SECS
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: std::env::var("UNIVOICE_LLM_API_KEY").ok(),
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_combiner_max_segments")]
    pub combiner_max_segments: usize,
    #[serde(default = "default_combiner_min_segments")]
    pub combiner_min_segments: usize,
    #[serde(default = "default_combiner_timeout_ms")]
    pub combiner_timeout_ms: u64,
    #[serde(default = "default_sentences_per_block")]
    pub history_sentences_per_block: usize,
    #[serde(default = "default_quiet_gap_ms")]
    pub history_quiet_gap_ms: u64,
    /// Keep pre-upgrade sentence targets in `raw_text` when a paragraph
    /// retranslation replaces them.
    #[serde(default)]
    pub retain_sentence_targets: bool,
}

fn default_combiner_max_segments() -> usize {
    constants::combiner::MAX_SEGMENTS
}

fn default_combiner_min_segments() -> usize {
    constants::combiner::MIN_SEGMENTS
}

fn default_combiner_timeout_ms() -> u64 {
    constants::combiner::TIMEOUT_MS
}

fn default_sentences_per_block() -> usize {
    constants::history::SENTENCES_PER_BLOCK
}

fn default_quiet_gap_ms() -> u64 {
    constants::history::QUIET_GAP_MS
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            combiner_max_segments: default_combiner_max_segments(),
            combiner_min_segments: default_combiner_min_segments(),
            combiner_timeout_ms: default_combiner_timeout_ms(),
            history_sentences_per_block: default_sentences_per_block(),
            history_quiet_gap_ms: default_quiet_gap_ms(),
            retain_sentence_targets: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Session root; `UNIVOICE_DATA_PATH` overrides, else `~/UniVoice`.
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_path: std::env::var_os("UNIVOICE_DATA_PATH").map(PathBuf::from),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub progressive_summaries: bool,
    #[serde(default = "default_true")]
    pub history_tier: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            progressive_summaries: true,
            history_tier: true,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.translation.concurrency == 0 {
            return Err(ConfigError::Invalid("translation.concurrency must be >= 1".into()));
        }
        if self.translation.queue_capacity == 0 {
            return Err(ConfigError::Invalid("translation.queue_capacity must be >= 1".into()));
        }
        if self.pipeline.combiner_min_segments > self.pipeline.combiner_max_segments {
            return Err(ConfigError::Invalid(
                "pipeline.combiner_min_segments exceeds combiner_max_segments".into(),
            ));
        }
        if self.pipeline.history_sentences_per_block == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.history_sentences_per_block must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load settings, layering files under `config/` with `UNIVOICE_*` env vars.
///
/// Priority: env vars > `config/{env}.yaml` > `config/default.yaml` > defaults.
/// Unknown environment variables are ignored.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
    }

    let raw = builder
        .add_source(Environment::with_prefix("UNIVOICE").separator("__"))
        .build()?;

    let mut settings: Settings = raw.try_deserialize()?;

    // Credentials always come from the environment, overriding any file value.
    if let Ok(key) = std::env::var("UNIVOICE_ASR_API_KEY") {
        settings.asr.api_key = Some(key);
    }
    if let Ok(key) = std::env::var("UNIVOICE_LLM_API_KEY") {
        settings.translation.api_key = Some(key);
    }
    if let Some(path) = std::env::var_os("UNIVOICE_DATA_PATH") {
        settings.storage.data_path = Some(PathBuf::from(path));
    }

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.translation.concurrency, 3);
        assert_eq!(settings.translation.queue_capacity, 100);
        assert_eq!(settings.asr.endpointing_ms, 800);
    }

    #[test]
    fn invalid_combiner_bounds_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.combiner_min_segments = 20;
        assert!(settings.validate().is_err());
    }
}
