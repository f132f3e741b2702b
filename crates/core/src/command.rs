//! The IPC command set accepted from the UI process.

use serde::{Deserialize, Serialize};

use crate::history::{HistoryBlock, Summary};
use crate::language::Language;

/// Commands from the UI process, tagged `{ "command": ..., "params": ... }`.
/// Unknown commands fail deserialization and are dropped at the IPC layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "camelCase")]
pub enum IpcCommand {
    StartListening {
        source_language: Language,
        target_language: Language,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    StopListening,
    Pause,
    Resume,
    GetHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    GetFullHistory,
    ClearHistory,
    TranslateUserInput {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_language: Option<Language>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_language: Option<Language>,
    },
    GenerateVocabulary,
    GenerateFinalReport,
    TranslateParagraph {
        paragraph_id: String,
        raw_text: String,
        #[serde(default)]
        segment_ids: Vec<String>,
    },
    GetAvailableSessions {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        course_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    LoadSession {
        course_name: String,
        date: String,
        session_number: u32,
    },
    StartSession {
        course_name: String,
        source_language: Language,
        target_language: Language,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_number: Option<u32>,
    },
    SaveHistoryBlock {
        block: HistoryBlock,
    },
    SaveSummary {
        summary: Summary,
    },
    SaveSession,
    /// Renderer-measured row height, fed back so both caption columns can
    /// adopt the max across the visible trio.
    ReportDisplayHeight {
        segment_id: String,
        height: f32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_shape() {
        let cmd = IpcCommand::StartListening {
            source_language: Language::parse("en").unwrap(),
            target_language: Language::parse("ja").unwrap(),
            correlation_id: None,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "startListening");
        assert_eq!(json["params"]["source_language"], "en");
    }

    #[test]
    fn parameterless_commands_parse() {
        let cmd: IpcCommand = serde_json::from_str(r#"{"command":"stopListening"}"#).unwrap();
        assert_eq!(cmd, IpcCommand::StopListening);
        let cmd: IpcCommand = serde_json::from_str(r#"{"command":"generateVocabulary"}"#).unwrap();
        assert_eq!(cmd, IpcCommand::GenerateVocabulary);
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(serde_json::from_str::<IpcCommand>(r#"{"command":"selfDestruct"}"#).is_err());
    }
}
