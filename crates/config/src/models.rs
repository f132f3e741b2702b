//! Model selection table.
//!
//! Every LLM-backed feature resolves its model through this table, keyed by
//! purpose. Swapping a model or effort tier is a configuration change; no
//! caller code references a model name directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the model call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPurpose {
    /// Per-segment live caption translation; latency-critical.
    RealtimeTranslation,
    /// Sentence-level background retranslation.
    HistoryTranslation,
    /// Paragraph-mode retranslation.
    ParagraphTranslation,
    /// Direct user text translation.
    UserTranslation,
    /// Progressive summaries (generation and translation).
    Summary,
    /// Domain-term extraction.
    Vocabulary,
    /// The long-form final report.
    FinalReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    #[default]
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    #[serde(default)]
    pub effort: ReasoningEffort,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.3
}

/// Purpose -> model mapping with built-in defaults for unlisted purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ModelTable {
    overrides: HashMap<ModelPurpose, ModelSpec>,
}

impl ModelTable {
    pub fn new(overrides: HashMap<ModelPurpose, ModelSpec>) -> Self {
        Self { overrides }
    }

    /// Resolve the spec for a purpose. Unlisted purposes fall back to the
    /// tiering the product ships with: nano for realtime, mini for history
    /// and summaries, the full model for the final report.
    pub fn resolve(&self, purpose: ModelPurpose) -> ModelSpec {
        if let Some(spec) = self.overrides.get(&purpose) {
            return spec.clone();
        }
        match purpose {
            ModelPurpose::RealtimeTranslation | ModelPurpose::UserTranslation => ModelSpec {
                model: "gpt-5-nano".to_string(),
                effort: ReasoningEffort::Minimal,
                max_tokens: 512,
                temperature: 0.3,
            },
            ModelPurpose::HistoryTranslation
            | ModelPurpose::ParagraphTranslation
            | ModelPurpose::Summary
            | ModelPurpose::Vocabulary => ModelSpec {
                model: "gpt-5-mini".to_string(),
                effort: ReasoningEffort::Low,
                max_tokens: 1536,
                temperature: 0.3,
            },
            ModelPurpose::FinalReport => ModelSpec {
                model: "gpt-5".to_string(),
                effort: ReasoningEffort::Medium,
                max_tokens: 4096,
                temperature: 0.4,
            },
        }
    }
}
