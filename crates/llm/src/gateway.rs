//! Chat-completions backend with SSE streaming.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use univoice_config::ModelSpec;

use crate::LlmError;

/// One generation request, already resolved to a concrete model spec.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub spec: ModelSpec,
    pub system: String,
    pub user: String,
}

impl GenerateRequest {
    pub fn new(spec: ModelSpec, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            spec,
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Terminal result of a generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Milliseconds to the first streamed token (equals `total_ms` for
    /// non-streaming calls).
    pub first_token_ms: u64,
    pub total_ms: u64,
}

/// The gateway seam. Production uses [`ChatGateway`]; tests substitute
/// scripted implementations.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Generate and return the full completion.
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError>;

    /// Generate, sending incremental text deltas to `tx` as they arrive.
    /// The terminal completion is still returned; a closed receiver cancels
    /// the remainder of the stream without error.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<Completion, LlmError>;
}

/// OpenAI-style chat-completions backend.
pub struct ChatGateway {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl ChatGateway {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let endpoint = endpoint.into();
        let api_key = api_key.into();
        if api_key.is_empty() && !endpoint.starts_with("http://localhost") {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, request: &GenerateRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request.spec.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            max_completion_tokens: Some(request.spec.max_tokens),
            temperature: Some(request.spec.temperature),
            reasoning_effort: Some(request.spec.effort.as_str().to_string()),
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl LlmGateway for ChatGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError> {
        let start = Instant::now();
        let body = self.build_request(&request, false);

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {error}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let total_ms = start.elapsed().as_millis() as u64;
        Ok(Completion {
            text: choice.message.map(|m| m.content).unwrap_or_default(),
            first_token_ms: total_ms,
            total_ms,
        })
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<Completion, LlmError> {
        use futures::StreamExt;

        let start = Instant::now();
        let body = self.build_request(&request, true);

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {error}")));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut first_token_ms: Option<u64> = None;
        let mut receiver_open = true;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited `data: {json}` lines.
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(frame) = serde_json::from_str::<StreamChunk>(json_str) else {
                    continue;
                };
                let Some(delta) = frame
                    .choices
                    .first()
                    .and_then(|c| c.delta.as_ref())
                    .and_then(|d| d.content.clone())
                else {
                    continue;
                };

                if first_token_ms.is_none() {
                    first_token_ms = Some(start.elapsed().as_millis() as u64);
                }
                full_text.push_str(&delta);
                if receiver_open && tx.send(delta).await.is_err() {
                    receiver_open = false;
                }
            }
        }

        let total_ms = start.elapsed().as_millis() as u64;
        Ok(Completion {
            text: full_text,
            first_token_ms: first_token_ms.unwrap_or(total_ms),
            total_ms,
        })
    }
}

// Chat-completions wire types.

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
