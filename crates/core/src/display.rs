//! Realtime three-line display types.

use serde::{Deserialize, Serialize};

/// Row position in the three-line caption area. Rotation is monotonic:
/// recent -> older -> oldest -> evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayPosition {
    Recent,
    Older,
    Oldest,
}

impl DisplayPosition {
    /// Contract opacity for this position; identical across the source and
    /// target columns.
    pub fn opacity(&self) -> f32 {
        match self {
            DisplayPosition::Recent => 1.0,
            DisplayPosition::Older => 0.6,
            DisplayPosition::Oldest => 0.3,
        }
    }
}

/// One column of a display row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayText {
    pub text: String,
    pub is_final: bool,
    /// Unix epoch milliseconds of the last update.
    pub timestamp: u64,
}

/// A (source, target) caption row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayPair {
    /// Aligns with the ASR segment id.
    pub id: String,
    pub source: DisplayText,
    pub target: DisplayText,
    pub position: DisplayPosition,
    pub opacity: f32,
    /// Measured render height reported by the renderer; advisory.
    pub height: Option<f32>,
}

/// The published view of the caption area after any mutation: the ordered
/// rows plus the unified height both columns adopt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    pub pairs: Vec<DisplayPair>,
    pub max_height: Option<f32>,
}
