//! Duplex WebSocket client for live recognition.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use univoice_config::constants;
use univoice_core::TranscriptSegment;

use crate::config::AsrLiveConfig;
use crate::messages::{SegmentTracker, WireMessage};
use crate::AsrError;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const AUDIO_CHANNEL_CAPACITY: usize = 512;

/// Events emitted by one live stream, in arrival order.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    Connected,
    Disconnected { reason: String },
    Transcript(TranscriptSegment),
    UtteranceEnd { last_word_end_ms: u64 },
    Metadata { request_id: String },
    /// Terminal stream error. The client does not reconnect; restart policy
    /// belongs to the orchestrator.
    Error { error: univoice_core::Error },
}

/// Handle to an open stream: audio goes in, shutdown is explicit.
pub struct AsrStream {
    audio_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl AsrStream {
    /// Push one PCM16 LE frame. Zero-length frames are ignored.
    pub async fn send_audio(&self, frame: Vec<u8>) -> Result<(), AsrError> {
        if frame.is_empty() {
            return Ok(());
        }
        self.audio_tx
            .send(frame)
            .await
            .map_err(|_| AsrError::Disconnected)
    }

    /// Close the stream: a `CloseStream` text frame lets the service flush
    /// its last results before the socket closes.
    pub async fn disconnect(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.writer.await;
        let _ = self.reader.await;
    }
}

/// Connection factory for live streams.
pub struct AsrClient;

impl AsrClient {
    /// Open a duplex stream. Returns the audio/shutdown handle and the
    /// ordered event receiver.
    pub async fn connect(
        config: AsrLiveConfig,
    ) -> Result<(AsrStream, mpsc::Receiver<AsrEvent>), AsrError> {
        let mut request = config
            .request_url()
            .into_client_request()
            .map_err(|e| AsrError::Connection(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| AsrError::Connection(e.to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, auth);

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(classify_connect_error)?;

        tracing::info!(
            model = %config.model,
            language = %config.wire_language(),
            "ASR stream connected"
        );

        let (mut sink, mut stream) = socket.split();
        let (event_tx, event_rx) = mpsc::channel::<AsrEvent>(EVENT_CHANNEL_CAPACITY);
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let _ = event_tx.send(AsrEvent::Connected).await;

        // Writer: audio frames, periodic keep-alives, explicit close.
        let writer = tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(std::time::Duration::from_secs(
                constants::asr::KEEPALIVE_INTERVAL_SECS,
            ));
            keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    frame = audio_rx.recv() => {
                        match frame {
                            Some(bytes) => {
                                if let Err(e) = sink.send(Message::Binary(bytes)).await {
                                    tracing::warn!("ASR audio send failed: {e}");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = keepalive.tick() => {
                        let msg = Message::Text(r#"{"type":"KeepAlive"}"#.to_string());
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            let close = Message::Text(r#"{"type":"CloseStream"}"#.to_string());
                            let _ = sink.send(close).await;
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
            tracing::debug!("ASR writer task ended");
        });

        // Reader: normalize inbound messages into events.
        let mut tracker = SegmentTracker::new(config.source_language.clone());
        let reader = tokio::spawn(async move {
            let mut closed_cleanly = false;

            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        Self::dispatch_text(&text, &mut tracker, &event_tx).await;
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by peer".to_string());
                        let _ = event_tx.send(AsrEvent::Disconnected { reason }).await;
                        closed_cleanly = true;
                        break;
                    }
                    Ok(_) => {} // ping/pong/binary: nothing to do
                    Err(e) => {
                        let error = AsrError::StreamClosed(e.to_string()).into_pipeline_error();
                        let _ = event_tx.send(AsrEvent::Error { error }).await;
                        break;
                    }
                }
            }

            if !closed_cleanly {
                let _ = event_tx
                    .send(AsrEvent::Disconnected {
                        reason: "stream ended".to_string(),
                    })
                    .await;
            }
            tracing::debug!("ASR reader task ended");
        });

        Ok((
            AsrStream {
                audio_tx,
                shutdown_tx,
                writer,
                reader,
            },
            event_rx,
        ))
    }

    async fn dispatch_text(
        text: &str,
        tracker: &mut SegmentTracker,
        event_tx: &mpsc::Sender<AsrEvent>,
    ) {
        let message = match serde_json::from_str::<WireMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("unparseable ASR message ignored: {e}");
                return;
            }
        };

        match message {
            WireMessage::Results(results) => {
                if let Some(segment) = tracker.normalize(&results) {
                    let _ = event_tx.send(AsrEvent::Transcript(segment)).await;
                }
            }
            WireMessage::UtteranceEnd(end) => {
                let last_word_end_ms = (end.last_word_end * 1000.0).round().max(0.0) as u64;
                let _ = event_tx.send(AsrEvent::UtteranceEnd { last_word_end_ms }).await;
            }
            WireMessage::Metadata(meta) => {
                let _ = event_tx
                    .send(AsrEvent::Metadata {
                        request_id: meta.request_id,
                    })
                    .await;
            }
            WireMessage::Error(err) => {
                let error = match err.code.as_str() {
                    "429" | "RATE_LIMITED" => AsrError::RateLimited(err.description),
                    _ => AsrError::StreamClosed(err.description),
                }
                .into_pipeline_error();
                let _ = event_tx.send(AsrEvent::Error { error }).await;
            }
            WireMessage::Unknown => {
                tracing::debug!("unknown ASR message type ignored");
            }
        }
    }
}

fn classify_connect_error(err: WsError) -> AsrError {
    match &err {
        WsError::Http(response) => match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AsrError::Auth,
            StatusCode::TOO_MANY_REQUESTS => AsrError::RateLimited("connect rejected".to_string()),
            status => AsrError::Connection(format!("HTTP {status}")),
        },
        _ => AsrError::Connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_classification() {
        let io = WsError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(classify_connect_error(io), AsrError::Connection(_)));
    }

    #[tokio::test]
    async fn dispatch_emits_normalized_transcripts() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = SegmentTracker::new(univoice_core::Language::parse("en").unwrap());

        let raw = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "Hello world.", "confidence": 0.97}]},
            "is_final": true, "speech_final": true, "start": 0.0, "duration": 0.8
        }"#;
        AsrClient::dispatch_text(raw, &mut tracker, &tx).await;

        match rx.recv().await.unwrap() {
            AsrEvent::Transcript(seg) => {
                assert_eq!(seg.id, "asr_1");
                assert_eq!(seg.text, "Hello world.");
                assert!(seg.is_final);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_tolerates_junk() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = SegmentTracker::new(univoice_core::Language::parse("en").unwrap());
        AsrClient::dispatch_text("not json", &mut tracker, &tx).await;
        AsrClient::dispatch_text(r#"{"type":"SpeechStarted"}"#, &mut tracker, &tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rate_limit_errors_map_to_taxonomy() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut tracker = SegmentTracker::new(univoice_core::Language::parse("en").unwrap());
        let raw = r#"{"type": "Error", "description": "slow down", "code": "429"}"#;
        AsrClient::dispatch_text(raw, &mut tracker, &tx).await;
        match rx.recv().await.unwrap() {
            AsrEvent::Error { error } => assert_eq!(error.code(), "asr_rate_limited"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
