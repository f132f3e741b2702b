//! Unified pipeline orchestrator.
//!
//! One reactor task owns every in-flight collection: pending segments,
//! active translations, display pairs, history state. Everything else
//! (queue workers, the ASR stream, feature generation) runs concurrently
//! and reports back through the reactor's message channel, so all
//! orchestration state stays single-writer.
//!
//! Ordering: realtime terminals are published in ASR-final order through a
//! reorder buffer; a history-tier terminal is held until every segment of
//! its combined sentence has finalized. A late result for an
//! already-finalized segment is dropped, which is what makes finalization
//! at-most-once even when a timeout fallback races the real completion.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

use univoice_asr::{AsrClient, AsrEvent, AsrLiveConfig, AsrStream};
use univoice_config::{constants, AsrSettings, ModelPurpose, ModelTable};
use univoice_core::{
    AsrPayload, CombinedSentence, CombinedSentencePayload, Error, EventEnvelope, FinalReport,
    FinalReportPayload, HistoryBlock, IpcCommand, Language, ParagraphCompletePayload,
    PipelineEvent, PipelineState, ProgressiveSummaryPayload, SegmentPayload, SegmentStatus,
    SentenceEntry, StatusPayload, Summary, TranscriptSegment, TranslationKind, TranslationPayload,
    TranslationPriority, TranslationRequest, TranslationResult, VocabularyItem, VocabularyPayload,
    TRANSLATION_FALLBACK_NOTICE,
};
use univoice_llm::{GenerateRequest, LlmGateway, PromptBuilder};
use univoice_store::{SessionStore, StartSessionParams};

use crate::combiner::{CombinerConfig, SentenceCombiner};
use crate::display::DisplaySync;
use crate::features::{count_words, FeatureScheduler, ThresholdTracker};
use crate::history::{HistoryConfig, HistoryGrouper};
use crate::queue::{QueueConfig, Translated, TranslationHandler, TranslationQueue};
use crate::state::StateMachine;
use crate::PipelineError;

const MSG_CHANNEL_CAPACITY: usize = 1024;
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const TICK_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// ASR seam
// ---------------------------------------------------------------------------

/// Outbound half of a connected ASR stream.
#[async_trait]
pub trait AsrSink: Send + Sync {
    async fn send_audio(&self, frame: Vec<u8>) -> Result<(), Error>;
    async fn disconnect(self: Box<Self>);
}

/// Connection factory seam; tests substitute scripted sources.
#[async_trait]
pub trait AsrSource: Send + Sync {
    async fn connect(
        &self,
        source_language: Language,
    ) -> Result<(Box<dyn AsrSink>, mpsc::Receiver<AsrEvent>), Error>;
}

/// Production source backed by the live WebSocket client.
pub struct LiveAsrSource {
    settings: AsrSettings,
}

impl LiveAsrSource {
    pub fn new(settings: AsrSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl AsrSource for LiveAsrSource {
    async fn connect(
        &self,
        source_language: Language,
    ) -> Result<(Box<dyn AsrSink>, mpsc::Receiver<AsrEvent>), Error> {
        let api_key = self
            .settings
            .api_key
            .clone()
            .ok_or_else(|| Error::AsrConnectionFailed("UNIVOICE_ASR_API_KEY not set".into()))?;

        let mut config = AsrLiveConfig::new(
            self.settings.endpoint.clone(),
            api_key,
            self.settings.model.clone(),
            source_language,
        );
        config.interim_results = self.settings.interim_results;
        config.endpointing_ms = self.settings.endpointing_ms;
        config.utterance_end_ms = self.settings.utterance_end_ms;
        config.smart_format = self.settings.smart_format;
        config.no_delay = self.settings.no_delay;

        let (stream, events) = AsrClient::connect(config)
            .await
            .map_err(|e| e.into_pipeline_error())?;
        Ok((Box::new(stream), events))
    }
}

#[async_trait]
impl AsrSink for AsrStream {
    async fn send_audio(&self, frame: Vec<u8>) -> Result<(), Error> {
        AsrStream::send_audio(self, frame)
            .await
            .map_err(|e| e.into_pipeline_error())
    }

    async fn disconnect(self: Box<Self>) {
        AsrStream::disconnect(*self).await;
    }
}

// ---------------------------------------------------------------------------
// Translation handler over the gateway
// ---------------------------------------------------------------------------

struct GatewayTranslationHandler {
    gateway: Arc<dyn LlmGateway>,
    models: ModelTable,
    msg_tx: mpsc::Sender<Msg>,
}

impl GatewayTranslationHandler {
    fn purpose(kind: TranslationKind) -> ModelPurpose {
        match kind {
            TranslationKind::Realtime => ModelPurpose::RealtimeTranslation,
            TranslationKind::History => ModelPurpose::HistoryTranslation,
            TranslationKind::Paragraph => ModelPurpose::ParagraphTranslation,
            TranslationKind::User => ModelPurpose::UserTranslation,
        }
    }
}

#[async_trait]
impl TranslationHandler for GatewayTranslationHandler {
    async fn translate(&self, request: &TranslationRequest) -> Result<Translated, Error> {
        let spec = self.models.resolve(Self::purpose(request.kind));
        let prompts = PromptBuilder::new(
            request.source_language.clone(),
            request.target_language.clone(),
        );
        let generate = GenerateRequest::new(
            spec,
            prompts.translation_system(request.kind),
            prompts.translation_user(&request.source_text),
        );

        if request.kind == TranslationKind::Realtime {
            // Stream deltas back into the reactor so the caption row fills in
            // while the model is still generating.
            let (delta_tx, mut delta_rx) = mpsc::channel::<String>(64);
            let msg_tx = self.msg_tx.clone();
            let segment_id = request.segment_id.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(delta) = delta_rx.recv().await {
                    let msg = Msg::TranslationDelta {
                        segment_id: segment_id.clone(),
                        delta,
                    };
                    if msg_tx.send(msg).await.is_err() {
                        break;
                    }
                }
            });

            let completion = self
                .gateway
                .generate_stream(generate, delta_tx)
                .await
                .map_err(Error::from)?;
            let _ = forwarder.await;
            Ok(Translated {
                text: completion.text.trim().to_string(),
                first_paint_ms: Some(completion.first_token_ms),
            })
        } else {
            let completion = self.gateway.generate(generate).await.map_err(Error::from)?;
            Ok(Translated {
                text: completion.text.trim().to_string(),
                first_paint_ms: None,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Messages and public handle
// ---------------------------------------------------------------------------

enum Msg {
    Command(IpcCommand, oneshot::Sender<Result<serde_json::Value, Error>>),
    Asr(AsrEvent),
    Audio(Vec<u8>),
    TranslationDelta {
        segment_id: String,
        delta: String,
    },
    /// A realtime outcome landed in the shared mailbox; drain it. The
    /// mailbox (rather than a payload here) lets the stop path collect
    /// results that are still queued behind the stop command itself.
    RealtimeNudge,
    HistoryDone {
        combined_id: String,
        segment_ids: Vec<String>,
        outcome: Result<TranslationResult, Error>,
    },
    UserDone {
        segment_id: String,
        source_text: String,
        outcome: Result<TranslationResult, Error>,
    },
    ParagraphDone {
        paragraph_id: String,
        segment_ids: Vec<String>,
        raw_text: String,
        outcome: Result<TranslationResult, Error>,
    },
    SummaryDone {
        threshold: usize,
        outcome: Result<Summary, Error>,
    },
    VocabularyDone {
        outcome: Result<Vec<VocabularyItem>, Error>,
    },
    ReportDone {
        outcome: Result<FinalReport, Error>,
    },
    Tick,
}

/// Everything the worker needs, injected at spawn.
pub struct PipelineDeps {
    pub gateway: Arc<dyn LlmGateway>,
    pub asr: Arc<dyn AsrSource>,
    pub store: SessionStore,
    pub models: ModelTable,
    pub queue_config: QueueConfig,
    pub combiner_config: CombinerConfig,
    pub history_config: HistoryConfig,
    pub progressive_summaries: bool,
    pub history_tier: bool,
}

/// Cheap clonable handle to the reactor: commands in, events out.
#[derive(Clone)]
pub struct PipelineHandle {
    msg_tx: mpsc::Sender<Msg>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl PipelineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }

    pub async fn command(&self, command: IpcCommand) -> Result<serde_json::Value, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.msg_tx
            .send(Msg::Command(command, reply_tx))
            .await
            .map_err(|_| Error::TranslationFailed("pipeline worker unavailable".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::TranslationFailed("pipeline worker unavailable".into()))?
    }

    /// Push one PCM16 frame from the audio channel.
    pub async fn push_audio(&self, frame: Vec<u8>) -> Result<(), Error> {
        self.msg_tx
            .send(Msg::Audio(frame))
            .await
            .map_err(|_| Error::AudioCaptureFailed("pipeline worker unavailable".into()))
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Spawn the reactor and its tick task; the returned handle is the only
    /// way in or out.
    pub fn spawn(deps: PipelineDeps) -> PipelineHandle {
        let (msg_tx, msg_rx) = mpsc::channel(MSG_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let worker = Worker::new(deps, msg_tx.clone(), event_tx.clone());
        tokio::spawn(worker.run(msg_rx));

        let tick_tx = msg_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tick_tx.send(Msg::Tick).await.is_err() {
                    break;
                }
            }
        });

        PipelineHandle { msg_tx, event_tx }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct InFlightSegment {
    segment_id: String,
    source_text: String,
}

struct Worker {
    gateway: Arc<dyn LlmGateway>,
    asr: Arc<dyn AsrSource>,
    store: SessionStore,
    models: ModelTable,
    combiner_config: CombinerConfig,
    progressive_summaries: bool,
    history_tier: bool,

    msg_tx: mpsc::Sender<Msg>,
    event_tx: broadcast::Sender<EventEnvelope>,

    correlation_id: String,
    sm: StateMachine,
    combiner: SentenceCombiner,
    display: DisplaySync,
    history: HistoryGrouper,
    queue: TranslationQueue,
    queue_config: QueueConfig,
    tracker: ThresholdTracker,
    features: Option<Arc<FeatureScheduler>>,

    source_language: Option<Language>,
    target_language: Option<Language>,

    asr_sink: Option<Box<dyn AsrSink>>,
    asr_lost: bool,

    // Realtime sequencing: seq assigned at ASR-final arrival, terminals
    // published strictly in seq order.
    next_seq: u64,
    emit_next: u64,
    in_flight: BTreeMap<u64, InFlightSegment>,
    /// Mailbox filled by the realtime waiter tasks, drained by the reactor.
    realtime_done: Arc<parking_lot::Mutex<BTreeMap<u64, Result<TranslationResult, Error>>>>,
    pending_terminals: BTreeMap<u64, Result<TranslationResult, Error>>,
    finalized: HashSet<String>,
    /// Combined sentences held until every composing segment has its
    /// realtime terminal; only then do `combinedSentence` and the
    /// history-tier enqueue happen, preserving per-segment ordering.
    waiting_sentences: Vec<CombinedSentence>,

    summaries: Vec<Summary>,
    vocabulary: Option<Vec<VocabularyItem>>,

    transcript: String,
    total_words: usize,
    window_start_ms: Option<u64>,
    last_end_ms: u64,

    user_seq: u64,
    listen_started: Option<Instant>,
    elapsed_ms: u64,
}

impl Worker {
    fn new(
        deps: PipelineDeps,
        msg_tx: mpsc::Sender<Msg>,
        event_tx: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        Self {
            gateway: deps.gateway,
            asr: deps.asr,
            store: deps.store,
            models: deps.models,
            combiner: SentenceCombiner::new(deps.combiner_config.clone()),
            combiner_config: deps.combiner_config,
            history: HistoryGrouper::new(deps.history_config),
            progressive_summaries: deps.progressive_summaries,
            history_tier: deps.history_tier,
            queue: TranslationQueue::new(deps.queue_config.clone()),
            queue_config: deps.queue_config,
            msg_tx,
            event_tx,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            sm: StateMachine::new(),
            display: DisplaySync::new(),
            tracker: ThresholdTracker::new(),
            features: None,
            source_language: None,
            target_language: None,
            asr_sink: None,
            asr_lost: false,
            next_seq: 0,
            emit_next: 0,
            in_flight: BTreeMap::new(),
            realtime_done: Arc::new(parking_lot::Mutex::new(BTreeMap::new())),
            pending_terminals: BTreeMap::new(),
            finalized: HashSet::new(),
            waiting_sentences: Vec::new(),
            summaries: Vec::new(),
            vocabulary: None,
            transcript: String::new(),
            total_words: 0,
            window_start_ms: None,
            last_end_ms: 0,
            user_seq: 0,
            listen_started: None,
            elapsed_ms: 0,
        }
    }

    async fn run(mut self, mut msg_rx: mpsc::Receiver<Msg>) {
        tracing::info!(correlation_id = %self.correlation_id, "pipeline worker started");
        while let Some(msg) = msg_rx.recv().await {
            self.handle(msg).await;
        }
        tracing::info!("pipeline worker stopped");
    }

    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Command(command, reply) => {
                let result = self.handle_command(command).await;
                if let Err(err) = &result {
                    self.publish_error(err);
                }
                let _ = reply.send(result);
            }
            Msg::Asr(event) => self.handle_asr(event).await,
            Msg::Audio(frame) => self.handle_audio(frame).await,
            Msg::TranslationDelta { segment_id, delta } => {
                self.handle_delta(&segment_id, &delta);
            }
            Msg::RealtimeNudge => {
                self.drain_realtime_mailbox();
                self.flush_terminals().await;
            }
            Msg::HistoryDone {
                combined_id,
                segment_ids,
                outcome,
            } => {
                self.handle_history_done(combined_id, segment_ids, outcome).await;
            }
            Msg::UserDone {
                segment_id,
                source_text,
                outcome,
            } => self.handle_user_done(segment_id, source_text, outcome),
            Msg::ParagraphDone {
                paragraph_id,
                segment_ids,
                raw_text,
                outcome,
            } => {
                self.handle_paragraph_done(paragraph_id, segment_ids, raw_text, outcome)
                    .await;
            }
            Msg::SummaryDone { threshold, outcome } => {
                self.handle_summary_done(threshold, outcome).await;
            }
            Msg::VocabularyDone { outcome } => self.handle_vocabulary_done(outcome).await,
            Msg::ReportDone { outcome } => self.handle_report_done(outcome).await,
            Msg::Tick => self.tick().await,
        }
    }

    // -- event publication --------------------------------------------------

    fn publish(&self, event: PipelineEvent) {
        let _ = self
            .event_tx
            .send(EventEnvelope::new(event, self.correlation_id.clone()));
    }

    fn publish_error(&self, err: &Error) {
        self.publish(PipelineEvent::Error(err.into()));
    }

    fn publish_status(&self, details: Option<String>) {
        self.publish(PipelineEvent::Status(StatusPayload {
            state: self.sm.state(),
            details,
        }));
    }

    fn publish_segment_row(&mut self, segment_id: &str) {
        // Emit the display row state as a `segment` event; metadata carries
        // the position/opacity/unified-height contract for the renderer.
        let snapshot = self.display.current_snapshot();
        let max_height = snapshot.max_height;
        let Some(pair) = snapshot.pairs.into_iter().find(|p| p.id == segment_id) else {
            return;
        };
        let status = if pair.target.is_final {
            SegmentStatus::Completed
        } else {
            SegmentStatus::Processing
        };
        self.publish(PipelineEvent::Segment(SegmentPayload {
            segment_id: pair.id.clone(),
            text: pair.source.text.clone(),
            translation: if pair.target.text.is_empty() {
                None
            } else {
                Some(pair.target.text.clone())
            },
            status,
            metadata: Some(serde_json::json!({
                "position": pair.position,
                "opacity": pair.opacity,
                "max_height": max_height,
            })),
        }));
    }

    // -- command handling ---------------------------------------------------

    async fn handle_command(
        &mut self,
        command: IpcCommand,
    ) -> Result<serde_json::Value, Error> {
        match command {
            IpcCommand::StartListening {
                source_language,
                target_language,
                correlation_id,
            } => {
                self.start_listening(source_language, target_language, correlation_id)
                    .await
            }
            IpcCommand::StopListening => self.stop_listening().await,
            IpcCommand::Pause => {
                self.sm.pause("pause command")?;
                if let Some(started) = self.listen_started.take() {
                    self.elapsed_ms += started.elapsed().as_millis() as u64;
                }
                self.publish_status(None);
                Ok(serde_json::json!({ "state": "paused" }))
            }
            IpcCommand::Resume => {
                self.sm.resume("resume command")?;
                self.listen_started = Some(Instant::now());
                self.publish_status(None);
                Ok(serde_json::json!({ "state": self.sm.state().to_string() }))
            }
            IpcCommand::GetHistory { limit } => {
                let blocks = self.history.blocks();
                let start = limit
                    .map(|l| blocks.len().saturating_sub(l))
                    .unwrap_or(0);
                Ok(serde_json::to_value(&blocks[start..]).unwrap_or_default())
            }
            IpcCommand::GetFullHistory => Ok(serde_json::json!({
                "blocks": self.history.blocks(),
                "summaries": self.summaries,
                "total_words": self.total_words,
            })),
            IpcCommand::ClearHistory => {
                self.history.reset();
                Ok(serde_json::json!({ "cleared": true }))
            }
            IpcCommand::TranslateUserInput {
                text,
                source_language,
                target_language,
            } => self.translate_user_input(text, source_language, target_language),
            IpcCommand::GenerateVocabulary => self.generate_vocabulary(),
            IpcCommand::GenerateFinalReport => self.generate_final_report(),
            IpcCommand::TranslateParagraph {
                paragraph_id,
                raw_text,
                segment_ids,
            } => self.translate_paragraph(paragraph_id, raw_text, segment_ids).await,
            IpcCommand::GetAvailableSessions { course_name, limit } => {
                let sessions = self
                    .store
                    .list_available_sessions(course_name.as_deref(), limit)
                    .map_err(Error::from)?;
                Ok(serde_json::to_value(sessions).unwrap_or_default())
            }
            IpcCommand::LoadSession {
                course_name,
                date,
                session_number,
            } => {
                let date = chrono::NaiveDate::parse_from_str(&date, "%Y%m%d")
                    .or_else(|_| chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d"))
                    .map_err(|_| Error::PersistenceFailed(format!("invalid date: {date}")))?;
                let record = self
                    .store
                    .load_session(&course_name, date, session_number)
                    .map_err(Error::from)?;
                Ok(serde_json::to_value(record).unwrap_or_default())
            }
            IpcCommand::StartSession {
                course_name,
                source_language,
                target_language,
                session_number,
            } => {
                self.start_session(course_name, source_language, target_language, session_number)
                    .await
            }
            IpcCommand::SaveHistoryBlock { block } => {
                self.persist_block(block).await;
                Ok(serde_json::json!({ "saved": true }))
            }
            IpcCommand::SaveSummary { summary } => {
                if let Err(e) = self.store.append_summary(summary).await {
                    let err = Error::from(e);
                    self.publish_error(&err);
                }
                Ok(serde_json::json!({ "saved": true }))
            }
            IpcCommand::SaveSession => {
                let elapsed = self.current_elapsed_ms();
                if let Err(e) = self.store.save_elapsed(elapsed).await {
                    let err = Error::from(e);
                    self.publish_error(&err);
                }
                Ok(serde_json::json!({ "elapsed_ms": elapsed }))
            }
            IpcCommand::ReportDisplayHeight { segment_id, height } => {
                if self.display.report_height(&segment_id, height).is_some() {
                    self.publish_segment_row(&segment_id);
                }
                Ok(serde_json::json!({ "acknowledged": true }))
            }
        }
    }

    async fn start_listening(
        &mut self,
        source_language: Language,
        target_language: Language,
        correlation_id: Option<String>,
    ) -> Result<serde_json::Value, Error> {
        // Language changes mid-session require a restart; a start while
        // running is refused by the idle->starting guard.
        self.sm.transition(PipelineState::Starting, "start command")?;
        if let Some(id) = correlation_id {
            self.correlation_id = id;
        }
        self.publish_status(None);

        self.reset_stream_state();
        self.source_language = Some(source_language.clone());
        self.target_language = Some(target_language.clone());
        self.features = Some(Arc::new(FeatureScheduler::new(
            self.gateway.clone(),
            self.models.clone(),
            source_language.clone(),
            target_language,
        )));
        self.queue.set_handler(Arc::new(GatewayTranslationHandler {
            gateway: self.gateway.clone(),
            models: self.models.clone(),
            msg_tx: self.msg_tx.clone(),
        }));

        match self.asr.connect(source_language).await {
            Ok((sink, mut events)) => {
                self.asr_sink = Some(sink);
                self.asr_lost = false;
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if msg_tx.send(Msg::Asr(event)).await.is_err() {
                            break;
                        }
                    }
                });
                self.sm.transition(PipelineState::Listening, "asr connected")?;
                self.listen_started = Some(Instant::now());
                self.publish_status(None);
                Ok(serde_json::json!({ "correlation_id": self.correlation_id }))
            }
            Err(err) => {
                self.publish_error(&err);
                self.sm.transition(PipelineState::Error, err.code())?;
                self.publish_status(Some(err.to_string()));
                self.sm.transition(PipelineState::Idle, "error acknowledged")?;
                self.publish_status(None);
                Err(err)
            }
        }
    }

    async fn stop_listening(&mut self) -> Result<serde_json::Value, Error> {
        self.sm.transition(PipelineState::Stopping, "stop command")?;
        self.publish_status(None);

        if let Some(sink) = self.asr_sink.take() {
            sink.disconnect().await;
        }

        if let Some(sentence) = self.combiner.force_emit() {
            self.waiting_sentences.push(sentence);
        }

        self.queue
            .drain(Duration::from_millis(constants::queue::DRAIN_GRACE_MS))
            .await;

        // Collect results that finished during the drain but whose nudge is
        // still queued behind this command, then fall back for the rest.
        self.drain_realtime_mailbox();
        let remaining: Vec<u64> = self.in_flight.keys().copied().collect();
        for seq in remaining {
            self.pending_terminals.entry(seq).or_insert_with(|| {
                Err(Error::TranslationFailed("cancelled: pipeline stopping".into()))
            });
        }
        self.flush_terminals().await;

        // The flush may have released the force-emitted sentence; give its
        // history-tier translation a short window before the final flush.
        if !self.queue.is_idle() {
            self.queue
                .drain(Duration::from_millis(constants::queue::DRAIN_GRACE_MS / 4))
                .await;
        }

        if let Some(block) = self.history.flush() {
            self.persist_block(block).await;
        }

        if let Some(started) = self.listen_started.take() {
            self.elapsed_ms += started.elapsed().as_millis() as u64;
        }
        if self.store.has_active_session() {
            if let Err(e) = self.store.save_elapsed(self.elapsed_ms).await {
                let err = Error::from(e);
                self.publish_error(&err);
            }
        }

        self.sm.transition(PipelineState::Idle, "stopped")?;
        self.publish_status(None);
        Ok(serde_json::json!({ "state": "idle" }))
    }

    fn translate_user_input(
        &mut self,
        text: String,
        source_language: Option<Language>,
        target_language: Option<Language>,
    ) -> Result<serde_json::Value, Error> {
        let source = source_language
            .or_else(|| self.source_language.clone())
            .ok_or_else(|| Error::InvalidLanguage("no source language configured".into()))?;
        let target = target_language
            .or_else(|| self.target_language.clone())
            .ok_or_else(|| Error::InvalidLanguage("no target language configured".into()))?;

        self.ensure_handler();
        self.user_seq += 1;
        let segment_id = format!("user_{}", self.user_seq);
        let request = TranslationRequest {
            segment_id: segment_id.clone(),
            source_text: text.clone(),
            source_language: source,
            target_language: target,
            priority: TranslationPriority::High,
            kind: TranslationKind::User,
        };

        let rx = self.queue.enqueue(request)?;
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::TranslationFailed("queue dropped request".into())),
            };
            let _ = msg_tx
                .send(Msg::UserDone {
                    segment_id,
                    source_text: text,
                    outcome,
                })
                .await;
        });
        Ok(serde_json::json!({ "segment_id": format!("user_{}", self.user_seq) }))
    }

    fn generate_vocabulary(&mut self) -> Result<serde_json::Value, Error> {
        let features = self
            .features
            .clone()
            .ok_or_else(|| Error::InvalidLanguage("no session languages configured".into()))?;
        let transcript = self.transcript_for_features();
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = features
                .generate_vocabulary(&transcript)
                .await
                .map_err(PipelineError::into_core);
            let _ = msg_tx.send(Msg::VocabularyDone { outcome }).await;
        });
        Ok(serde_json::json!({ "status": "pending" }))
    }

    fn generate_final_report(&mut self) -> Result<serde_json::Value, Error> {
        let features = self
            .features
            .clone()
            .ok_or_else(|| Error::InvalidLanguage("no session languages configured".into()))?;
        let transcript = self.transcript_for_features();
        let summaries = self.summaries.clone();
        let vocabulary_count = self.vocabulary.as_ref().map(|v| v.len()).unwrap_or(0);
        let total_words = self.total_words;

        // Report generation is the one batch job heavy enough to surface as
        // its own lifecycle phase while live captioning continues.
        if self.sm.state() == PipelineState::Listening {
            self.sm
                .transition(PipelineState::Processing, "final report requested")?;
            self.publish_status(None);
        }

        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = features
                .generate_final_report(&transcript, &summaries, vocabulary_count, total_words)
                .await
                .map_err(PipelineError::into_core);
            let _ = msg_tx.send(Msg::ReportDone { outcome }).await;
        });
        Ok(serde_json::json!({ "status": "pending" }))
    }

    async fn translate_paragraph(
        &mut self,
        paragraph_id: String,
        raw_text: String,
        segment_ids: Vec<String>,
    ) -> Result<serde_json::Value, Error> {
        let source = self
            .source_language
            .clone()
            .ok_or_else(|| Error::InvalidLanguage("no source language configured".into()))?;
        let target = self
            .target_language
            .clone()
            .ok_or_else(|| Error::InvalidLanguage("no target language configured".into()))?;

        self.ensure_handler();
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let block =
            self.history
                .register_paragraph(&paragraph_id, &raw_text, segment_ids.clone(), now_ms, None);
        self.persist_block(block).await;

        let request = TranslationRequest {
            segment_id: format!("paragraph_{paragraph_id}"),
            source_text: raw_text.clone(),
            source_language: source,
            target_language: target,
            priority: TranslationPriority::Low,
            kind: TranslationKind::Paragraph,
        };
        let rx = self.queue.enqueue(request)?;
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::TranslationFailed("queue dropped request".into())),
            };
            let _ = msg_tx
                .send(Msg::ParagraphDone {
                    paragraph_id,
                    segment_ids,
                    raw_text,
                    outcome,
                })
                .await;
        });
        Ok(serde_json::json!({ "status": "pending" }))
    }

    async fn start_session(
        &mut self,
        course_name: String,
        source_language: Language,
        target_language: Language,
        session_number: Option<u32>,
    ) -> Result<serde_json::Value, Error> {
        // Same-day resume: an existing session for this course today with a
        // matching language pair is rehydrated instead of shadowed.
        if session_number.is_none() {
            if let Some(existing) = self
                .store
                .check_today_session(&course_name)
                .map_err(Error::from)?
            {
                if existing.source_language == source_language
                    && existing.target_language == target_language
                {
                    let record = self.store.resume_session(&existing).await.map_err(Error::from)?;
                    self.rehydrate(&record);
                    return Ok(serde_json::json!({
                        "resumed": true,
                        "metadata": record.metadata,
                    }));
                }
            }
        }

        let metadata = self
            .store
            .start_session(StartSessionParams {
                course_name,
                source_language,
                target_language,
                session_number,
            })
            .await
            .map_err(Error::from)?;
        Ok(serde_json::json!({ "resumed": false, "metadata": metadata }))
    }

    fn rehydrate(&mut self, record: &univoice_core::SessionRecord) {
        self.history.hydrate(record.history_blocks.clone());
        self.summaries = record.summaries.clone();
        self.vocabulary = record.vocabulary.clone();
        self.elapsed_ms = record.metadata.elapsed_ms;

        let progressive = record
            .summaries
            .iter()
            .filter(|s| s.threshold.is_some())
            .count();
        self.tracker.resume_at(progressive);

        // The live transcript is not persisted; rebuild its word mass from
        // the stored sources so later thresholds line up.
        self.transcript = record
            .history_blocks
            .iter()
            .flat_map(|b| b.sentences.iter())
            .map(|s| s.source_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.total_words = count_words(&self.transcript);
    }

    // -- ASR handling -------------------------------------------------------

    async fn handle_asr(&mut self, event: AsrEvent) {
        match event {
            AsrEvent::Connected => {}
            AsrEvent::Metadata { request_id } => {
                tracing::debug!(%request_id, "asr stream metadata");
            }
            AsrEvent::UtteranceEnd { last_word_end_ms } => {
                tracing::trace!(last_word_end_ms, "utterance end");
            }
            AsrEvent::Transcript(segment) => self.handle_transcript(segment).await,
            AsrEvent::Disconnected { reason } => {
                if self.sm.state() == PipelineState::Stopping
                    || self.sm.state() == PipelineState::Idle
                {
                    return;
                }
                tracing::warn!(%reason, "asr stream dropped");
                let err = Error::AsrStreamClosed(reason);
                self.publish_error(&err);
                // Stay in listening so in-flight translations still land;
                // the tick settles into error -> idle once they have.
                self.asr_lost = true;
                self.asr_sink = None;
            }
            AsrEvent::Error { error } => {
                // Stream errors are connection-level; same settling path as
                // an unexpected disconnect.
                self.publish_error(&error);
                self.asr_lost = true;
                self.asr_sink = None;
            }
        }
    }

    async fn handle_transcript(&mut self, segment: TranscriptSegment) {
        self.publish(PipelineEvent::Asr(AsrPayload {
            text: segment.text.clone(),
            confidence: segment.confidence,
            is_final: segment.is_final,
            language: Some(segment.language.clone()),
            segment_id: Some(segment.id.clone()),
        }));

        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.display
            .update_source(&segment.id, &segment.text, segment.is_final, now_ms);
        self.publish_segment_row(&segment.id);

        if !segment.is_final {
            return;
        }

        // Word accounting for the summary thresholds.
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(&segment.text);
        self.total_words += count_words(&segment.text);
        if self.window_start_ms.is_none() {
            self.window_start_ms = Some(segment.start_ms);
        }
        self.last_end_ms = segment.end_ms;

        // Realtime tier: one translation per accepted final segment.
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(
            seq,
            InFlightSegment {
                segment_id: segment.id.clone(),
                source_text: segment.text.clone(),
            },
        );
        self.enqueue_realtime(seq, &segment);
        // A queue-full fallback lands in the reorder buffer synchronously.
        if self.pending_terminals.contains_key(&self.emit_next) {
            self.flush_terminals().await;
        }

        // Sentence combining for the history tier. The sentence is held
        // until its segments' realtime terminals have been published.
        if let Some(sentence) = self.combiner.add_segment(segment) {
            self.waiting_sentences.push(sentence);
            self.release_sentences().await;
        }

        // Progressive summaries.
        if self.progressive_summaries {
            let crossed = self.tracker.update(self.total_words);
            if !crossed.is_empty() {
                let window = (self.window_start_ms.take().unwrap_or(0), self.last_end_ms);
                for threshold in crossed {
                    self.spawn_summary(threshold, window);
                }
            }
        }
    }

    fn enqueue_realtime(&mut self, seq: u64, segment: &TranscriptSegment) {
        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };
        let request = TranslationRequest {
            segment_id: segment.id.clone(),
            source_text: segment.text.clone(),
            source_language: source,
            target_language: target,
            priority: TranslationPriority::Normal,
            kind: TranslationKind::Realtime,
        };

        match self.queue.enqueue(request) {
            Ok(rx) => {
                let deadline = dynamic_timeout(segment.text.len());
                let msg_tx = self.msg_tx.clone();
                let mailbox = self.realtime_done.clone();
                let segment_id = segment.id.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = match tokio::time::timeout(deadline, rx).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(_)) => {
                            Err(Error::TranslationFailed("queue dropped request".into()))
                        }
                        Err(_) => Err(Error::TranslationTimeout {
                            segment_id: segment_id.clone(),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        }),
                    };
                    mailbox.lock().insert(seq, outcome);
                    let _ = msg_tx.send(Msg::RealtimeNudge).await;
                });
            }
            Err(err) => {
                // Backpressure on the realtime tier degrades to the fallback
                // caption rather than dropping the segment.
                self.pending_terminals.insert(seq, Err(err));
            }
        }
    }

    /// Move mailbox outcomes for still-tracked segments into the reorder
    /// buffer; late completions for finalized segments drop here, which is
    /// what keeps finalization at-most-once.
    fn drain_realtime_mailbox(&mut self) {
        let drained: Vec<(u64, Result<TranslationResult, Error>)> = {
            let mut mailbox = self.realtime_done.lock();
            std::mem::take(&mut *mailbox).into_iter().collect()
        };
        for (seq, outcome) in drained {
            if self.in_flight.contains_key(&seq) {
                self.pending_terminals.insert(seq, outcome);
            }
        }
    }

    /// Publish and enqueue history work for sentences whose segments have
    /// all finalized.
    async fn release_sentences(&mut self) {
        let mut index = 0;
        while index < self.waiting_sentences.len() {
            let ready = self.waiting_sentences[index]
                .segment_ids
                .iter()
                .all(|id| self.finalized.contains(id));
            if !ready {
                index += 1;
                continue;
            }
            let sentence = self.waiting_sentences.remove(index);
            self.handle_sentence(sentence).await;
        }
    }

    async fn handle_sentence(&mut self, sentence: CombinedSentence) {
        self.publish(PipelineEvent::CombinedSentence(CombinedSentencePayload {
            combined_id: sentence.id.clone(),
            segment_ids: sentence.segment_ids.clone(),
            source_text: sentence.source_text.clone(),
            timestamp: sentence.start_ms,
            end_timestamp: sentence.end_ms,
            segment_count: sentence.segment_count,
        }));

        if !self.history_tier {
            return;
        }
        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };

        let request = TranslationRequest {
            segment_id: format!("history_{}", sentence.id),
            source_text: sentence.source_text.clone(),
            source_language: source,
            target_language: target,
            priority: TranslationPriority::Low,
            kind: TranslationKind::History,
        };

        match self.queue.enqueue(request) {
            Ok(rx) => {
                let msg_tx = self.msg_tx.clone();
                let combined_id = sentence.id.clone();
                let segment_ids = sentence.segment_ids.clone();
                tokio::spawn(async move {
                    let outcome = match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            Err(Error::TranslationFailed("queue dropped request".into()))
                        }
                    };
                    let _ = msg_tx
                        .send(Msg::HistoryDone {
                            combined_id,
                            segment_ids,
                            outcome,
                        })
                        .await;
                });
            }
            Err(err) => {
                // History tier drops silently under backpressure; the
                // realtime translation already stands in for the sentence.
                tracing::debug!(
                    combined_id = %sentence.id,
                    code = err.code(),
                    "history translation dropped"
                );
            }
        }
    }

    // -- terminal sequencing ------------------------------------------------

    async fn flush_terminals(&mut self) {
        while let Some(outcome) = self.pending_terminals.remove(&self.emit_next) {
            let seq = self.emit_next;
            self.emit_next += 1;
            let Some(info) = self.in_flight.remove(&seq) else {
                continue;
            };
            self.emit_realtime_terminal(info, outcome).await;
        }
        self.release_sentences().await;
    }

    async fn emit_realtime_terminal(
        &mut self,
        info: InFlightSegment,
        outcome: Result<TranslationResult, Error>,
    ) {
        if !self.finalized.insert(info.segment_id.clone()) {
            return; // at-most-once
        }

        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let (target_text, confidence) = match &outcome {
            Ok(result) => (result.target_text.clone(), result.confidence),
            Err(err) => {
                self.publish_error(err);
                (
                    format!("{TRANSLATION_FALLBACK_NOTICE}\n{}", info.source_text),
                    0.0,
                )
            }
        };

        self.display
            .finalize_target(&info.segment_id, &target_text, now_ms);
        self.publish(PipelineEvent::Translation(TranslationPayload {
            source_text: info.source_text.clone(),
            target_text: target_text.clone(),
            source_language: source,
            target_language: target,
            confidence,
            is_final: true,
            segment_id: Some(info.segment_id.clone()),
        }));
        self.publish_segment_row(&info.segment_id);

        if let Some(block) = self.history.add_sentence(SentenceEntry {
            id: info.segment_id,
            source_text: info.source_text,
            target_text,
            timestamp: now_ms,
        }) {
            self.persist_block(block).await;
        }
    }

    async fn handle_history_done(
        &mut self,
        combined_id: String,
        segment_ids: Vec<String>,
        outcome: Result<TranslationResult, Error>,
    ) {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                // Sentence stays recorded with its realtime text; a caller
                // can retry later via translateParagraph.
                tracing::debug!(
                    %combined_id,
                    code = err.code(),
                    "history-tier translation failed"
                );
                return;
            }
        };

        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };
        self.publish(PipelineEvent::Translation(TranslationPayload {
            source_text: result.source_text.clone(),
            target_text: result.target_text.clone(),
            source_language: source,
            target_language: target,
            confidence: result.confidence,
            is_final: true,
            segment_id: Some(format!("history_{combined_id}")),
        }));

        // The upgraded translation covers the whole combined sentence; it
        // lands on the first segment's row, later segments keep their
        // realtime text (single-segment sentences are the common case with
        // endpointing-driven finals).
        if let Some(first) = segment_ids.first() {
            if let Some(block) = self
                .history
                .update_sentence_translation(first, &result.target_text)
            {
                self.persist_block(block).await;
            }
        }
    }

    fn handle_user_done(
        &mut self,
        segment_id: String,
        source_text: String,
        outcome: Result<TranslationResult, Error>,
    ) {
        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };
        match outcome {
            Ok(result) => self.publish(PipelineEvent::Translation(TranslationPayload {
                source_text,
                target_text: result.target_text,
                source_language: source,
                target_language: target,
                confidence: result.confidence,
                is_final: true,
                segment_id: Some(segment_id),
            })),
            Err(err) => self.publish_error(&err),
        }
    }

    async fn handle_paragraph_done(
        &mut self,
        paragraph_id: String,
        segment_ids: Vec<String>,
        raw_text: String,
        outcome: Result<TranslationResult, Error>,
    ) {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.publish_error(&err);
                return;
            }
        };

        let word_count = count_words(&raw_text);
        self.publish(PipelineEvent::ParagraphComplete(ParagraphCompletePayload {
            paragraph_id: paragraph_id.clone(),
            segment_ids,
            raw_text,
            cleaned_text: None,
            start_time: 0,
            end_time: result.complete_ms,
            duration: result.complete_ms,
            word_count,
            paragraph: Some(result.target_text.clone()),
        }));

        if let Some(block) = self
            .history
            .update_paragraph_translation(&paragraph_id, &result.target_text)
        {
            self.persist_block(block).await;
        }
    }

    // -- features -----------------------------------------------------------

    fn spawn_summary(&mut self, threshold: usize, window: (u64, u64)) {
        let Some(features) = self.features.clone() else {
            return;
        };
        let transcript = self.transcript.clone();
        let total_words = self.total_words;
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = features
                .generate_progressive_summary(threshold, total_words, &transcript, Some(window))
                .await
                .map_err(PipelineError::into_core);
            let _ = msg_tx.send(Msg::SummaryDone { threshold, outcome }).await;
        });
    }

    async fn handle_summary_done(&mut self, threshold: usize, outcome: Result<Summary, Error>) {
        let summary = match outcome {
            Ok(summary) => summary,
            Err(err) => {
                // Skip this threshold; later thresholds are unaffected.
                tracing::warn!(threshold, "summary generation failed: {err}");
                self.publish_error(&err);
                return;
            }
        };

        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };
        self.publish(PipelineEvent::ProgressiveSummary(ProgressiveSummaryPayload {
            source_text: summary.source_text.clone(),
            target_text: summary.target_text.clone(),
            source_language: source,
            target_language: target,
            word_count: summary.word_count,
            threshold,
            start_time: summary.time_range.map(|(s, _)| s),
            end_time: summary.time_range.map(|(_, e)| e),
        }));

        self.summaries.push(summary.clone());
        if self.store.has_active_session() {
            if let Err(e) = self.store.append_summary(summary).await {
                let err = Error::from(e);
                self.publish_error(&err);
            }
        }
    }

    async fn handle_vocabulary_done(&mut self, outcome: Result<Vec<VocabularyItem>, Error>) {
        match outcome {
            Ok(items) => {
                self.publish(PipelineEvent::Vocabulary(VocabularyPayload {
                    total_terms: items.len(),
                    items: items.clone(),
                }));
                self.vocabulary = Some(items.clone());
                if self.store.has_active_session() {
                    if let Err(e) = self.store.finalize(None, Some(items)).await {
                        let err = Error::from(e);
                        self.publish_error(&err);
                    }
                }
            }
            Err(err) => self.publish_error(&err),
        }
    }

    async fn handle_report_done(&mut self, outcome: Result<FinalReport, Error>) {
        match outcome {
            Ok(report) => {
                self.publish(PipelineEvent::FinalReport(FinalReportPayload {
                    report: report.report.clone(),
                    total_word_count: report.total_word_count,
                    summary_count: report.summary_count,
                    vocabulary_count: report.vocabulary_count,
                }));
                if self.store.has_active_session() {
                    if let Err(e) = self.store.finalize(Some(report), None).await {
                        let err = Error::from(e);
                        self.publish_error(&err);
                    }
                }
            }
            Err(err) => self.publish_error(&err),
        }

        if self.sm.state() == PipelineState::Processing
            && self
                .sm
                .transition(PipelineState::Listening, "final report finished")
                .is_ok()
        {
            self.publish_status(None);
        }
    }

    // -- periodic work ------------------------------------------------------

    async fn tick(&mut self) {
        if let Some(sentence) = self.combiner.check_timeout(Instant::now()) {
            self.waiting_sentences.push(sentence);
            self.release_sentences().await;
        }
        if let Some(block) = self.history.check_quiet_gap(Instant::now()) {
            self.persist_block(block).await;
        }

        // A lost ASR stream settles into error -> idle once the last final
        // segment's translation has been delivered.
        if self.asr_lost
            && self.sm.state() == PipelineState::Listening
            && self.in_flight.is_empty()
            && self.queue.is_idle()
        {
            self.asr_lost = false;
            if self.sm.transition(PipelineState::Error, "asr stream lost").is_ok() {
                self.publish_status(Some("asr stream lost".into()));
                if self.sm.transition(PipelineState::Idle, "error acknowledged").is_ok() {
                    self.publish_status(None);
                }
            }
        }
    }

    async fn handle_audio(&mut self, frame: Vec<u8>) {
        if frame.is_empty() || self.sm.state() != PipelineState::Listening {
            return;
        }
        let Some(sink) = &self.asr_sink else {
            return;
        };
        if let Err(err) = sink.send_audio(frame).await {
            tracing::warn!(code = err.code(), "audio forward failed");
        }
    }

    fn handle_delta(&mut self, segment_id: &str, delta: &str) {
        if self.finalized.contains(segment_id) {
            return;
        }
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if self.display.append_target_delta(segment_id, delta, now_ms).is_none() {
            return;
        }
        let (Some(source), Some(target)) =
            (self.source_language.clone(), self.target_language.clone())
        else {
            return;
        };
        let accumulated = self
            .display
            .target_text(segment_id)
            .unwrap_or_default()
            .to_string();
        let source_text = self
            .in_flight
            .values()
            .find(|s| s.segment_id == segment_id)
            .map(|s| s.source_text.clone())
            .unwrap_or_default();
        self.publish(PipelineEvent::Translation(TranslationPayload {
            source_text,
            target_text: accumulated,
            source_language: source,
            target_language: target,
            confidence: 0.0,
            is_final: false,
            segment_id: Some(segment_id.to_string()),
        }));
        self.publish_segment_row(segment_id);
    }

    // -- helpers ------------------------------------------------------------

    fn ensure_handler(&mut self) {
        self.queue.set_handler(Arc::new(GatewayTranslationHandler {
            gateway: self.gateway.clone(),
            models: self.models.clone(),
            msg_tx: self.msg_tx.clone(),
        }));
    }

    fn reset_stream_state(&mut self) {
        self.combiner = SentenceCombiner::new(self.combiner_config.clone());
        // A fresh queue also clears the cancel latch a previous shutdown may
        // have tripped; stray runners on the old one resolve into dropped
        // receivers.
        self.queue = TranslationQueue::new(self.queue_config.clone());
        self.display.reset();
        self.next_seq = 0;
        self.emit_next = 0;
        self.in_flight.clear();
        self.realtime_done.lock().clear();
        self.pending_terminals.clear();
        self.finalized.clear();
        self.waiting_sentences.clear();
        self.window_start_ms = None;
        self.asr_lost = false;
    }

    fn transcript_for_features(&self) -> String {
        if !self.transcript.is_empty() {
            return self.transcript.clone();
        }
        self.history
            .blocks()
            .iter()
            .flat_map(|b| b.sentences.iter())
            .map(|s| s.source_text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn current_elapsed_ms(&self) -> u64 {
        self.elapsed_ms
            + self
                .listen_started
                .map(|s| s.elapsed().as_millis() as u64)
                .unwrap_or(0)
    }

    async fn persist_block(&mut self, block: HistoryBlock) {
        if !self.store.has_active_session() {
            tracing::debug!(block = %block.id, "no active session; block kept in memory only");
            return;
        }
        if let Err(e) = self.store.append_history_block(block).await {
            // Persistence failures never block live captioning; the store
            // retries naturally on the next append.
            let err = Error::from(e);
            self.publish_error(&err);
        }
    }
}

/// Realtime deadline: 7 s base plus 150 ms per 10 source characters,
/// clamped to the 7-10 s band; the queue's 30 s cap backstops everything.
fn dynamic_timeout(source_len: usize) -> Duration {
    let extra_ms = (source_len as u64 / 10) * 150;
    let total = (constants::queue::REALTIME_TIMEOUT_MIN_MS + extra_ms)
        .min(constants::queue::REALTIME_TIMEOUT_MAX_MS);
    Duration::from_millis(total)
}
