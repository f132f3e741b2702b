//! WebSocket handlers for the two IPC channels.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::ipc::{self, CommandReply};
use crate::state::AppState;

/// `/ws`: JSON commands in, enveloped events and command replies out.
pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_events_socket(socket, state))
}

async fn handle_events_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.pipeline.subscribe();

    // Late joiners get the current pipeline state first.
    if let Some(status) = state.last_status() {
        if let Ok(text) = ipc::encode_event(&status) {
            if sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        match ipc::encode_event(&envelope) {
                            Ok(text) => {
                                if sender.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                // Outbound message failed its own schema:
                                // dropped, logged, never sent malformed.
                                tracing::error!(
                                    code = err.code(),
                                    kind = envelope.event.kind(),
                                    "dropping outbound event: {err}"
                                );
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagged; events skipped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = receiver.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        let command = match ipc::parse_command(&text) {
                            Ok(command) => command,
                            Err(err) => {
                                tracing::warn!(
                                    code = err.code(),
                                    raw = %text.chars().take(200).collect::<String>(),
                                    "dropping invalid command: {err}"
                                );
                                continue;
                            }
                        };
                        let name = ipc::command_name(&command);
                        tracing::debug!(command = name, "dispatching command");

                        let reply = match state.pipeline.command(command).await {
                            Ok(data) => CommandReply::success(name, data),
                            Err(err) => CommandReply::failure(name, &err),
                        };
                        if let Ok(text) = serde_json::to_string(&reply) {
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Binary(_) => {
                        tracing::warn!("binary frame on the command channel dropped");
                    }
                }
            }
        }
    }
    tracing::debug!("event socket closed");
}

/// `/ws/audio`: unidirectional binary PCM16 frames from the renderer.
pub async fn ws_audio(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_audio_socket(socket, state))
}

async fn handle_audio_socket(mut socket: WebSocket, state: AppState) {
    let mut frames: u64 = 0;
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Binary(bytes) => {
                frames += 1;
                if frames % 500 == 0 {
                    tracing::debug!(frames, "audio frames received");
                }
                if state.pipeline.push_audio(bytes).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {} // frames are opaque bytes; anything else is ignored
        }
    }
    tracing::debug!(frames, "audio socket closed");
}
