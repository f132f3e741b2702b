//! Schema validation for the IPC channels.
//!
//! Schemas are compiled once. Validation is structural (envelope shape,
//! known tags, field types); serde then enforces the exact payloads. A
//! message failing either layer is dropped and logged, never a crash.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::Serialize;

use univoice_core::{Error, EventEnvelope, IpcCommand};

const EVENT_TYPES: &[&str] = &[
    "asr",
    "translation",
    "segment",
    "combinedSentence",
    "progressiveSummary",
    "paragraphComplete",
    "status",
    "vocabulary",
    "finalReport",
    "error",
];

const COMMANDS: &[&str] = &[
    "startListening",
    "stopListening",
    "pause",
    "resume",
    "getHistory",
    "getFullHistory",
    "clearHistory",
    "translateUserInput",
    "generateVocabulary",
    "generateFinalReport",
    "translateParagraph",
    "getAvailableSessions",
    "loadSession",
    "startSession",
    "saveHistoryBlock",
    "saveSummary",
    "saveSession",
    "reportDisplayHeight",
];

static EVENT_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema = serde_json::json!({
        "type": "object",
        "required": ["type", "timestamp", "correlation_id", "data"],
        "properties": {
            "type": { "type": "string", "enum": EVENT_TYPES },
            "timestamp": { "type": "integer", "minimum": 0 },
            "correlation_id": { "type": "string", "minLength": 1 },
            "data": { "type": "object" }
        },
        "additionalProperties": false
    });
    JSONSchema::compile(&schema).expect("event schema is valid")
});

static COMMAND_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema = serde_json::json!({
        "type": "object",
        "required": ["command"],
        "properties": {
            "command": { "type": "string", "enum": COMMANDS },
            "params": { "type": "object" }
        },
        "additionalProperties": false
    });
    JSONSchema::compile(&schema).expect("command schema is valid")
});

fn validation_errors(schema: &JSONSchema, value: &serde_json::Value) -> Option<String> {
    let result = schema.validate(value);
    match result {
        Ok(()) => None,
        Err(errors) => Some(
            errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        ),
    }
}

/// Parse and validate one inbound command frame.
pub fn parse_command(text: &str) -> Result<IpcCommand, Error> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::SchemaValidationFailed(format!("not JSON: {e}")))?;
    if let Some(errors) = validation_errors(&COMMAND_SCHEMA, &value) {
        return Err(Error::SchemaValidationFailed(errors));
    }
    serde_json::from_value(value).map_err(|e| Error::SchemaValidationFailed(e.to_string()))
}

/// Serialize an outbound envelope, revalidating against the published
/// schema so a drifting payload is caught at the boundary.
pub fn encode_event(envelope: &EventEnvelope) -> Result<String, Error> {
    let value = serde_json::to_value(envelope)
        .map_err(|e| Error::SchemaValidationFailed(e.to_string()))?;
    if let Some(errors) = validation_errors(&EVENT_SCHEMA, &value) {
        return Err(Error::SchemaValidationFailed(errors));
    }
    serde_json::to_string(&value).map_err(|e| Error::SchemaValidationFailed(e.to_string()))
}

/// Reply frame for the command channel.
#[derive(Debug, Serialize)]
pub struct CommandReply<'a> {
    pub kind: &'static str,
    pub command: &'a str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl<'a> CommandReply<'a> {
    pub fn success(command: &'a str, data: serde_json::Value) -> Self {
        Self {
            kind: "commandResult",
            command,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(command: &'a str, error: &Error) -> Self {
        Self {
            kind: "commandResult",
            command,
            ok: false,
            data: None,
            error: Some(serde_json::json!({
                "code": error.code(),
                "message": error.to_string(),
                "recoverable": error.is_recoverable(),
            })),
        }
    }
}

/// The wire tag of a command, for reply frames.
pub fn command_name(command: &IpcCommand) -> &'static str {
    match command {
        IpcCommand::StartListening { .. } => "startListening",
        IpcCommand::StopListening => "stopListening",
        IpcCommand::Pause => "pause",
        IpcCommand::Resume => "resume",
        IpcCommand::GetHistory { .. } => "getHistory",
        IpcCommand::GetFullHistory => "getFullHistory",
        IpcCommand::ClearHistory => "clearHistory",
        IpcCommand::TranslateUserInput { .. } => "translateUserInput",
        IpcCommand::GenerateVocabulary => "generateVocabulary",
        IpcCommand::GenerateFinalReport => "generateFinalReport",
        IpcCommand::TranslateParagraph { .. } => "translateParagraph",
        IpcCommand::GetAvailableSessions { .. } => "getAvailableSessions",
        IpcCommand::LoadSession { .. } => "loadSession",
        IpcCommand::StartSession { .. } => "startSession",
        IpcCommand::SaveHistoryBlock { .. } => "saveHistoryBlock",
        IpcCommand::SaveSummary { .. } => "saveSummary",
        IpcCommand::SaveSession => "saveSession",
        IpcCommand::ReportDisplayHeight { .. } => "reportDisplayHeight",
    }
}
