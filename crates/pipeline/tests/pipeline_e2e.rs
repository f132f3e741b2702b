//! End-to-end pipeline scenarios over a scripted ASR source and a mock LLM
//! gateway. Timers run under tokio's paused clock, so stalls and timeouts
//! resolve deterministically without real waiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use univoice_asr::AsrEvent;
use univoice_config::ModelTable;
use univoice_core::{
    Error, EventEnvelope, IpcCommand, Language, PipelineEvent, PipelineState, TranscriptSegment,
    TRANSLATION_FALLBACK_NOTICE,
};
use univoice_llm::{Completion, GenerateRequest, LlmError, LlmGateway};
use univoice_pipeline::{
    AsrSink, AsrSource, CombinerConfig, HistoryConfig, Pipeline, PipelineDeps, PipelineHandle,
    QueueConfig,
};
use univoice_store::SessionStore;

// ---------------------------------------------------------------------------
// Scripted ASR
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct ScriptedAsr {
    feed: Arc<Mutex<Option<mpsc::Sender<AsrEvent>>>>,
}

impl ScriptedAsr {
    async fn send(&self, event: AsrEvent) {
        let tx = self.feed.lock().clone().expect("asr not connected");
        tx.send(event).await.expect("pipeline gone");
    }

    async fn transcript(&self, id: &str, text: &str, is_final: bool, start_ms: u64, end_ms: u64) {
        self.send(AsrEvent::Transcript(TranscriptSegment {
            id: id.to_string(),
            text: text.to_string(),
            is_final,
            confidence: 0.95,
            start_ms,
            end_ms,
            language: Language::parse("en").unwrap(),
        }))
        .await;
    }
}

struct NullSink;

#[async_trait]
impl AsrSink for NullSink {
    async fn send_audio(&self, _frame: Vec<u8>) -> Result<(), Error> {
        Ok(())
    }

    async fn disconnect(self: Box<Self>) {}
}

#[async_trait]
impl AsrSource for ScriptedAsr {
    async fn connect(
        &self,
        _source_language: Language,
    ) -> Result<(Box<dyn AsrSink>, mpsc::Receiver<AsrEvent>), Error> {
        let (tx, rx) = mpsc::channel(256);
        *self.feed.lock() = Some(tx);
        Ok((Box::new(NullSink), rx))
    }
}

// ---------------------------------------------------------------------------
// Mock gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockGateway {
    /// user text -> canned completion; unlisted text echoes with a marker.
    canned: Mutex<HashMap<String, String>>,
    /// (system prompt fragment, reply): matched before the user-text map,
    /// for prompts whose user text is the whole transcript.
    by_system: Mutex<Vec<(String, String)>>,
    /// user text -> delay before completing.
    stalls: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl MockGateway {
    fn on(&self, user: &str, reply: &str) {
        self.canned.lock().insert(user.to_string(), reply.to_string());
    }

    fn when_system(&self, fragment: &str, reply: &str) {
        self.by_system
            .lock()
            .push((fragment.to_string(), reply.to_string()));
    }

    fn stall(&self, user: &str, delay: Duration) {
        self.stalls.lock().insert(user.to_string(), delay);
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_for(&self, request: &GenerateRequest) -> String {
        if let Some((_, reply)) = self
            .by_system
            .lock()
            .iter()
            .find(|(fragment, _)| request.system.contains(fragment))
        {
            return reply.clone();
        }
        self.canned
            .lock()
            .get(&request.user)
            .cloned()
            .unwrap_or_else(|| format!("{} [translated]", request.user))
    }
}

#[async_trait]
impl LlmGateway for MockGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.stalls.lock().get(&request.user).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Completion {
            text: self.reply_for(&request),
            first_token_ms: 1,
            total_ms: 2,
        })
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.reply_for(&request);
        let delay = self.stalls.lock().get(&request.user).copied();

        // First half streams immediately; the stall (if any) sits between
        // the first delta and completion, like a slow tail.
        let mid = reply.len() / 2;
        let split = reply
            .char_indices()
            .map(|(i, _)| i)
            .filter(|&i| i <= mid)
            .next_back()
            .unwrap_or(0);
        let (head, tail) = reply.split_at(split);
        if !head.is_empty() {
            let _ = tx.send(head.to_string()).await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !tail.is_empty() {
            let _ = tx.send(tail.to_string()).await;
        }

        Ok(Completion {
            text: reply,
            first_token_ms: 1,
            total_ms: 2,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    handle: PipelineHandle,
    asr: ScriptedAsr,
    gateway: Arc<MockGateway>,
    events: broadcast::Receiver<EventEnvelope>,
    _tmp: tempfile::TempDir,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MockGateway::default());
    let asr = ScriptedAsr::default();

    let deps = PipelineDeps {
        gateway: gateway.clone(),
        asr: Arc::new(asr.clone()),
        store: SessionStore::new(tmp.path().to_path_buf()),
        models: ModelTable::default(),
        queue_config: QueueConfig::default(),
        combiner_config: CombinerConfig {
            timeout: Duration::from_millis(400),
            ..CombinerConfig::default()
        },
        history_config: HistoryConfig {
            sentences_per_block: 1,
            quiet_gap: Duration::from_millis(500),
            retain_sentence_targets: false,
        },
        progressive_summaries: true,
        history_tier: true,
    };

    let handle = Pipeline::spawn(deps);
    let events = handle.subscribe();
    Harness {
        handle,
        asr,
        gateway,
        events,
        _tmp: tmp,
    }
}

async fn start(h: &mut Harness, source: &str, target: &str) {
    h.handle
        .command(IpcCommand::StartListening {
            source_language: Language::parse(source).unwrap(),
            target_language: Language::parse(target).unwrap(),
            correlation_id: None,
        })
        .await
        .unwrap();
    let status = wait_for(h, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Listening)
    })
    .await;
    assert!(matches!(status, PipelineEvent::Status(_)));
}

/// Receive events until the predicate matches; panics after 5 s (paused
/// clock advances instantly when the runtime is otherwise idle).
async fn wait_for(
    h: &mut Harness,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> PipelineEvent {
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&envelope.event) {
            return envelope.event;
        }
    }
}

/// Collect events until the predicate matches; the matching event is
/// included as the last element.
async fn collect_until(
    h: &mut Harness,
    pred: impl Fn(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .expect("timed out collecting events")
            .expect("event channel closed");
        let done = pred(&envelope.event);
        seen.push(envelope.event);
        if done {
            return seen;
        }
    }
}

fn position_of(events: &[PipelineEvent], pred: impl Fn(&PipelineEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("expected event not found in {events:?}"))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// E1: a single short sentence flows through both tiers in order and lands
/// in a persisted history block.
#[tokio::test(start_paused = true)]
async fn single_sentence_en_to_ja() {
    let mut h = harness();
    h.gateway.on("Hello world.", "こんにちは世界。");

    h.handle
        .command(IpcCommand::StartSession {
            course_name: "Math".into(),
            source_language: Language::parse("en").unwrap(),
            target_language: Language::parse("ja").unwrap(),
            session_number: None,
        })
        .await
        .unwrap();
    start(&mut h, "en", "ja").await;

    h.asr.transcript("s1", "hello", false, 0, 400).await;
    h.asr.transcript("s1", "Hello world.", true, 0, 900).await;

    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("history_combined_1"))
    })
    .await;

    let interim = position_of(&events, |e| {
        matches!(e, PipelineEvent::Asr(a) if !a.is_final && a.text == "hello")
    });
    let final_asr = position_of(&events, |e| {
        matches!(e, PipelineEvent::Asr(a) if a.is_final && a.text == "Hello world.")
    });
    let realtime = position_of(&events, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final
                && t.segment_id.as_deref() == Some("s1")
                && t.target_text == "こんにちは世界。")
    });
    let combined = position_of(&events, |e| {
        matches!(e, PipelineEvent::CombinedSentence(c)
            if c.combined_id == "combined_1" && c.segment_ids == vec!["s1".to_string()])
    });
    let history = events.len() - 1;

    assert!(interim < final_asr);
    assert!(final_asr < realtime);
    assert!(realtime < combined);
    assert!(combined < history);

    // The history tier re-used the canned translation.
    match &events[history] {
        PipelineEvent::Translation(t) => assert_eq!(t.target_text, "こんにちは世界。"),
        other => panic!("unexpected event {other:?}"),
    }

    // One block persisted with source and target.
    let today = chrono::Utc::now().date_naive().format("%Y%m%d").to_string();
    let record = h
        .handle
        .command(IpcCommand::LoadSession {
            course_name: "Math".into(),
            date: today,
            session_number: 1,
        })
        .await
        .unwrap();
    let blocks = record["history_blocks"].as_array().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0]["sentences"][0]["source_text"], "Hello world.");
    assert_eq!(blocks[0]["sentences"][0]["target_text"], "こんにちは世界。");
}

/// E2: identical source and target language short-circuits both tiers with
/// no LLM invocation.
#[tokio::test(start_paused = true)]
async fn same_language_short_circuit() {
    let mut h = harness();
    start(&mut h, "ja", "ja").await;

    h.asr.transcript("s1", "今日は天気がいい。", true, 0, 800).await;

    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("history_combined_1"))
    })
    .await;

    let realtime_finals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Translation(t)
                if t.is_final && t.segment_id.as_deref() == Some("s1") =>
            {
                Some(t)
            }
            _ => None,
        })
        .collect();
    assert_eq!(realtime_finals.len(), 1, "exactly one terminal translation");
    assert_eq!(realtime_finals[0].target_text, "今日は天気がいい。");
    assert_eq!(realtime_finals[0].confidence, 1.0);

    assert_eq!(h.gateway.call_count(), 0, "no LLM call may be made");

    let history = h.handle.command(IpcCommand::GetFullHistory).await.unwrap();
    let blocks = history["blocks"].as_array().unwrap();
    assert_eq!(blocks[0]["sentences"][0]["source_text"], "今日は天気がいい。");
    assert_eq!(blocks[0]["sentences"][0]["target_text"], "今日は天気がいい。");
}

/// E3: summaries fire exactly once per threshold, at 400 and 800 words.
#[tokio::test(start_paused = true)]
async fn progressive_summary_thresholds() {
    let mut h = harness();
    start(&mut h, "en", "ja").await;

    let hundred = "word ".repeat(99) + "stop.";
    // 399 words: three hundreds and one 99-word segment.
    for i in 0..3 {
        h.asr
            .transcript(&format!("s{i}"), &hundred, true, i * 1000, i * 1000 + 900)
            .await;
    }
    let ninety_nine = "word ".repeat(98) + "stop.";
    h.asr.transcript("s3", &ninety_nine, true, 3000, 3900).await;

    // Let the pipeline settle; no summary may exist yet.
    let settle = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s3"))
    })
    .await;
    assert!(
        !settle
            .iter()
            .any(|e| matches!(e, PipelineEvent::ProgressiveSummary(_))),
        "no summary below 400 words"
    );

    // The 400th word.
    h.asr.transcript("s4", "More.", true, 4000, 4200).await;
    let summary = wait_for(&mut h, |e| matches!(e, PipelineEvent::ProgressiveSummary(_))).await;
    match summary {
        PipelineEvent::ProgressiveSummary(p) => {
            assert_eq!(p.threshold, 400);
            assert_eq!(p.word_count, 400);
        }
        _ => unreachable!(),
    }

    // To 799: still quiet.
    for i in 5..9 {
        let text = if i < 8 { hundred.clone() } else { ninety_nine.clone() };
        h.asr
            .transcript(&format!("s{i}"), &text, true, i * 1000, i * 1000 + 900)
            .await;
    }
    let settle = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s8"))
    })
    .await;
    assert!(
        !settle
            .iter()
            .any(|e| matches!(e, PipelineEvent::ProgressiveSummary(_))),
        "no second summary below 800 words"
    );

    // The 800th word.
    h.asr.transcript("s9", "Enough.", true, 9000, 9200).await;
    let summary = wait_for(&mut h, |e| matches!(e, PipelineEvent::ProgressiveSummary(_))).await;
    match summary {
        PipelineEvent::ProgressiveSummary(p) => assert_eq!(p.threshold, 800),
        _ => unreachable!(),
    }
}

/// E4: a stalled translation resolves to the fallback caption and a
/// recoverable timeout error, and the fallback is what history records.
#[tokio::test(start_paused = true)]
async fn translation_timeout_fallback() {
    let mut h = harness();
    h.gateway.stall("Hello world.", Duration::from_secs(60));

    start(&mut h, "en", "ja").await;
    h.asr.transcript("s7", "Hello world.", true, 0, 900).await;

    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s7"))
    })
    .await;

    assert!(events.iter().any(|e| matches!(e, PipelineEvent::Error(err)
        if err.code == "translation_timeout" && err.recoverable)));

    let expected = format!("{TRANSLATION_FALLBACK_NOTICE}\nHello world.");
    match events.last().unwrap() {
        PipelineEvent::Translation(t) => assert_eq!(t.target_text, expected),
        _ => unreachable!(),
    }

    let history = h.handle.command(IpcCommand::GetFullHistory).await.unwrap();
    assert_eq!(history["blocks"][0]["sentences"][0]["target_text"], expected);
}

/// E5: stop, then a fresh pipeline over the same store resumes today's
/// session with its blocks, summaries, and threshold progress.
#[tokio::test(start_paused = true)]
async fn same_day_resume_rehydrates() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();

    {
        let gateway = Arc::new(MockGateway::default());
        gateway.on("Hello world.", "こんにちは世界。");
        let asr = ScriptedAsr::default();
        let handle = Pipeline::spawn(PipelineDeps {
            gateway: gateway.clone(),
            asr: Arc::new(asr.clone()),
            store: SessionStore::new(root.clone()),
            models: ModelTable::default(),
            queue_config: QueueConfig::default(),
            combiner_config: CombinerConfig::default(),
            history_config: HistoryConfig {
                sentences_per_block: 1,
                quiet_gap: Duration::from_millis(500),
                retain_sentence_targets: false,
            },
            progressive_summaries: false,
            history_tier: false,
        });
        let mut events = handle.subscribe();

        handle
            .command(IpcCommand::StartSession {
                course_name: "Math".into(),
                source_language: Language::parse("en").unwrap(),
                target_language: Language::parse("ja").unwrap(),
                session_number: None,
            })
            .await
            .unwrap();
        handle
            .command(IpcCommand::StartListening {
                source_language: Language::parse("en").unwrap(),
                target_language: Language::parse("ja").unwrap(),
                correlation_id: None,
            })
            .await
            .unwrap();
        asr.transcript("s1", "Hello world.", true, 0, 900).await;
        // Wait for the realtime terminal so the block reaches the store.
        loop {
            let env = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(&env.event, PipelineEvent::Translation(t) if t.is_final) {
                break;
            }
        }
        handle.command(IpcCommand::StopListening).await.unwrap();
        // First pipeline dropped without ending the session: the crash.
    }

    let gateway = Arc::new(MockGateway::default());
    let handle = Pipeline::spawn(PipelineDeps {
        gateway,
        asr: Arc::new(ScriptedAsr::default()),
        store: SessionStore::new(root),
        models: ModelTable::default(),
        queue_config: QueueConfig::default(),
        combiner_config: CombinerConfig::default(),
        history_config: HistoryConfig::default(),
        progressive_summaries: false,
        history_tier: false,
    });

    let reply = handle
        .command(IpcCommand::StartSession {
            course_name: "Math".into(),
            source_language: Language::parse("en").unwrap(),
            target_language: Language::parse("ja").unwrap(),
            session_number: None,
        })
        .await
        .unwrap();
    assert_eq!(reply["resumed"], true);
    assert_eq!(reply["metadata"]["session_number"], 1);

    let history = handle.command(IpcCommand::GetFullHistory).await.unwrap();
    let blocks = history["blocks"].as_array().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0]["sentences"][0]["target_text"], "こんにちは世界。");
}

/// E6: pause lands quickly and in-flight streaming translations still
/// deliver their deltas and terminal.
#[tokio::test(start_paused = true)]
async fn pause_preserves_in_flight_translations() {
    let mut h = harness();
    h.gateway.on("Hello five.", "こんにちは五。");
    h.gateway.stall("Hello five.", Duration::from_millis(800));

    start(&mut h, "en", "ja").await;
    h.asr.transcript("s5", "Hello five.", true, 0, 700).await;

    // Pause right after the final; the first delta may or may not have
    // landed yet.
    h.handle.command(IpcCommand::Pause).await.unwrap();
    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s5"))
    })
    .await;

    let paused = position_of(&events, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Paused)
    });
    let terminal = events.len() - 1;
    assert!(paused < terminal, "terminal arrived after pause");
    match &events[terminal] {
        PipelineEvent::Translation(t) => assert_eq!(t.target_text, "こんにちは五。"),
        _ => unreachable!(),
    }

    // Resume returns to listening.
    h.handle.command(IpcCommand::Resume).await.unwrap();
    wait_for(&mut h, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Listening)
    })
    .await;
}

/// Terminal translation events respect ASR-final order even when a later
/// segment translates faster.
#[tokio::test(start_paused = true)]
async fn terminal_order_matches_asr_order() {
    let mut h = harness();
    h.gateway.on("Slow one.", "遅い。");
    h.gateway.on("Fast two.", "速い。");
    h.gateway.stall("Slow one.", Duration::from_millis(500));

    start(&mut h, "en", "ja").await;
    h.asr.transcript("s1", "Slow one.", true, 0, 500).await;
    h.asr.transcript("s2", "Fast two.", true, 600, 1100).await;

    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s2"))
    })
    .await;

    let s1 = position_of(&events, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s1"))
    });
    let s2 = events.len() - 1;
    assert!(s1 < s2, "s1's terminal must precede s2's");
}

/// An interim without a final shows a caption row with no translation and
/// adds nothing to history.
#[tokio::test(start_paused = true)]
async fn interim_only_creates_no_history() {
    let mut h = harness();
    start(&mut h, "en", "ja").await;

    h.asr.transcript("s1", "hel", false, 0, 200).await;
    let segment = wait_for(&mut h, |e| matches!(e, PipelineEvent::Segment(_))).await;
    match segment {
        PipelineEvent::Segment(s) => {
            assert_eq!(s.segment_id, "s1");
            assert!(s.translation.is_none());
        }
        _ => unreachable!(),
    }

    let history = h.handle.command(IpcCommand::GetFullHistory).await.unwrap();
    assert!(history["blocks"].as_array().unwrap().is_empty());
    assert_eq!(h.gateway.call_count(), 0);
}

/// Starting while running is refused; languages cannot change mid-session.
#[tokio::test(start_paused = true)]
async fn start_while_running_is_rejected() {
    let mut h = harness();
    start(&mut h, "en", "ja").await;

    let err = h
        .handle
        .command(IpcCommand::StartListening {
            source_language: Language::parse("en").unwrap(),
            target_language: Language::parse("zh").unwrap(),
            correlation_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state_transition");
}

/// Zero-length audio frames are ignored without a crash or an event.
#[tokio::test(start_paused = true)]
async fn empty_audio_frame_is_ignored() {
    let mut h = harness();
    start(&mut h, "en", "ja").await;

    h.handle.push_audio(Vec::new()).await.unwrap();
    h.handle.push_audio(vec![0u8; 640]).await.unwrap();

    // The pipeline is still healthy: a normal transcript flows through.
    h.gateway.on("Still fine.", "まだ大丈夫。");
    h.asr.transcript("s1", "Still fine.", true, 0, 400).await;
    wait_for(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t) if t.is_final)
    })
    .await;
}

/// An unexpected ASR drop keeps the pipeline listening until the last
/// in-flight translation lands, then settles through error into idle.
#[tokio::test(start_paused = true)]
async fn asr_drop_mid_utterance_settles_after_last_translation() {
    let mut h = harness();
    h.gateway.on("Last one.", "最後。");
    h.gateway.stall("Last one.", Duration::from_millis(300));

    start(&mut h, "en", "ja").await;
    h.asr.transcript("s1", "Last one.", true, 0, 500).await;
    h.asr
        .send(AsrEvent::Disconnected {
            reason: "network reset".into(),
        })
        .await;

    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Idle)
    })
    .await;

    let dropped = position_of(&events, |e| {
        matches!(e, PipelineEvent::Error(err) if err.code == "asr_stream_closed" && err.recoverable)
    });
    let terminal = position_of(&events, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("s1"))
    });
    let error_status = position_of(&events, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Error)
    });

    assert!(dropped < error_status);
    assert!(terminal < error_status, "translation delivered before the error transition");
    match &events[terminal] {
        PipelineEvent::Translation(t) => assert_eq!(t.target_text, "最後。"),
        _ => unreachable!(),
    }
}

/// Vocabulary extraction and the final report publish their events; report
/// generation passes through the processing phase and returns to listening.
#[tokio::test(start_paused = true)]
async fn vocabulary_and_final_report() {
    let mut h = harness();
    h.gateway.on("Hello world.", "こんにちは世界。");
    h.gateway.when_system(
        "JSON array",
        r#"[{"term": "t1", "definition": "d1"},
            {"term": "t2", "definition": "d2"},
            {"term": "t3", "definition": "d3"},
            {"term": "t4", "definition": "d4"},
            {"term": "t5", "definition": "d5"}]"#,
    );
    h.gateway.when_system("markdown report", "# Lecture Report\n\nBody.");

    start(&mut h, "en", "ja").await;
    h.asr.transcript("s1", "Hello world.", true, 0, 900).await;
    wait_for(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t) if t.is_final)
    })
    .await;

    h.handle.command(IpcCommand::GenerateVocabulary).await.unwrap();
    let vocab = wait_for(&mut h, |e| matches!(e, PipelineEvent::Vocabulary(_))).await;
    match vocab {
        PipelineEvent::Vocabulary(v) => {
            assert_eq!(v.total_terms, 5);
            assert_eq!(v.items[0].term, "t1");
        }
        _ => unreachable!(),
    }

    h.handle.command(IpcCommand::GenerateFinalReport).await.unwrap();
    let events = collect_until(&mut h, |e| matches!(e, PipelineEvent::FinalReport(_))).await;
    let processing = position_of(&events, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Processing)
    });
    let report = events.len() - 1;
    assert!(processing < report);
    match &events[report] {
        PipelineEvent::FinalReport(r) => {
            assert!(r.report.starts_with("# Lecture Report"));
            assert_eq!(r.vocabulary_count, 5);
            assert_eq!(r.summary_count, 0);
        }
        _ => unreachable!(),
    }

    wait_for(&mut h, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Listening)
    })
    .await;
}

/// Paragraph retranslation produces a paragraphComplete event and its own
/// paragraph block, leaving sentence blocks untouched.
#[tokio::test(start_paused = true)]
async fn paragraph_retranslation() {
    let mut h = harness();
    h.gateway.on("Hello world.", "こんにちは世界。");
    h.gateway.on("Hello world. And more.", "段落の翻訳。");

    start(&mut h, "en", "ja").await;
    h.asr.transcript("s1", "Hello world.", true, 0, 900).await;
    wait_for(&mut h, |e| {
        matches!(e, PipelineEvent::Translation(t)
            if t.is_final && t.segment_id.as_deref() == Some("history_combined_1"))
    })
    .await;

    h.handle
        .command(IpcCommand::TranslateParagraph {
            paragraph_id: "p1".into(),
            raw_text: "Hello world. And more.".into(),
            segment_ids: vec!["s1".into()],
        })
        .await
        .unwrap();

    let done = wait_for(&mut h, |e| matches!(e, PipelineEvent::ParagraphComplete(_))).await;
    match done {
        PipelineEvent::ParagraphComplete(p) => {
            assert_eq!(p.paragraph_id, "p1");
            assert_eq!(p.paragraph.as_deref(), Some("段落の翻訳。"));
            assert_eq!(p.word_count, 4);
        }
        _ => unreachable!(),
    }

    let history = h.handle.command(IpcCommand::GetFullHistory).await.unwrap();
    let blocks = history["blocks"].as_array().unwrap();
    let paragraph_block = blocks
        .iter()
        .find(|b| b["is_paragraph"] == true)
        .expect("paragraph block exists");
    assert_eq!(paragraph_block["sentences"][0]["target_text"], "段落の翻訳。");
    // The sentence block keeps its own (upgraded) translation.
    let sentence_block = blocks.iter().find(|b| b["is_paragraph"] == false).unwrap();
    assert_eq!(sentence_block["sentences"][0]["target_text"], "こんにちは世界。");
}

/// Stopping drains cleanly and lands back in idle.
#[tokio::test(start_paused = true)]
async fn stop_drains_and_returns_to_idle() {
    let mut h = harness();
    h.gateway.on("Last words", "最後の言葉");

    start(&mut h, "en", "ja").await;
    // No terminal punctuation: only the stop flush emits this sentence.
    h.asr.transcript("s1", "Last words", true, 0, 400).await;

    h.handle.command(IpcCommand::StopListening).await.unwrap();
    let events = collect_until(&mut h, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Idle)
    })
    .await;

    let stopping = position_of(&events, |e| {
        matches!(e, PipelineEvent::Status(s) if s.state == PipelineState::Stopping)
    });
    let combined = position_of(&events, |e| {
        matches!(e, PipelineEvent::CombinedSentence(c) if c.source_text == "Last words")
    });
    assert!(stopping < combined, "flush happens during stopping");
}
