//! Bounded two-tier translation queue.
//!
//! Three priority buckets (high, normal, low), FIFO within a bucket, a
//! worker cap shared across buckets, and a hard per-request timeout. The
//! queue itself never retries; retry policy stays with the caller. Every
//! accepted request resolves to exactly one terminal outcome through its
//! oneshot channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

use univoice_config::constants;
use univoice_core::{Error, TranslationPriority, TranslationRequest, TranslationResult};

/// Nominal confidence attached to successful LLM translations; identity
/// (same-language) results carry 1.0 per the short-circuit contract.
const LLM_CONFIDENCE: f64 = 0.9;

/// Handler output: the final target text plus when the first streamed delta
/// left the handler (deltas themselves travel on the handler's side channel).
#[derive(Debug, Clone)]
pub struct Translated {
    pub text: String,
    pub first_paint_ms: Option<u64>,
}

/// Executes one translation. Implemented over the LLM gateway in production
/// and by scripted fakes in tests.
#[async_trait]
pub trait TranslationHandler: Send + Sync {
    async fn translate(&self, request: &TranslationRequest) -> Result<Translated, Error>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub capacity: usize,
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: constants::queue::CONCURRENCY,
            capacity: constants::queue::CAPACITY,
            request_timeout: Duration::from_secs(constants::queue::HARD_TIMEOUT_SECS),
        }
    }
}

type ErrorHandler = dyn Fn(&TranslationRequest, &Error) + Send + Sync;

struct Job {
    request: TranslationRequest,
    done: oneshot::Sender<Result<TranslationResult, Error>>,
}

#[derive(Default)]
struct Buckets {
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
    low: VecDeque<Job>,
}

impl Buckets {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn push(&mut self, job: Job) {
        match job.request.priority {
            TranslationPriority::High => self.high.push_back(job),
            TranslationPriority::Normal => self.normal.push_back(job),
            TranslationPriority::Low => self.low.push_back(job),
        }
    }

    /// Highest priority first, FIFO within a bucket.
    fn pop(&mut self) -> Option<Job> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn drain_all(&mut self) -> Vec<Job> {
        self.high
            .drain(..)
            .chain(self.normal.drain(..))
            .chain(self.low.drain(..))
            .collect()
    }
}

struct QueueInner {
    config: QueueConfig,
    handler: Mutex<Option<Arc<dyn TranslationHandler>>>,
    error_handler: Mutex<Option<Arc<ErrorHandler>>>,
    state: Mutex<QueueState>,
    /// Flipped at shutdown so in-flight jobs resolve with a typed error
    /// instead of hanging past the drain grace.
    cancel_tx: watch::Sender<bool>,
}

struct QueueState {
    buckets: Buckets,
    active: usize,
}

#[derive(Clone)]
pub struct TranslationQueue {
    inner: Arc<QueueInner>,
}

impl TranslationQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                config,
                handler: Mutex::new(None),
                error_handler: Mutex::new(None),
                state: Mutex::new(QueueState {
                    buckets: Buckets::default(),
                    active: 0,
                }),
                cancel_tx,
            }),
        }
    }

    pub fn set_handler(&self, handler: Arc<dyn TranslationHandler>) {
        *self.inner.handler.lock() = Some(handler);
    }

    /// Observe per-request failures before their terminal is delivered;
    /// retry/fallback policy lives with the observer, not the queue.
    pub fn set_error_handler(&self, handler: Arc<ErrorHandler>) {
        *self.inner.error_handler.lock() = Some(handler);
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().buckets.len()
    }

    pub fn active(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.active == 0 && state.buckets.len() == 0
    }

    /// Accept a request. Same-language requests short-circuit to an identity
    /// result without touching the queue or the handler. A full queue
    /// rejects immediately with `translation_queue_full`.
    pub fn enqueue(
        &self,
        request: TranslationRequest,
    ) -> Result<oneshot::Receiver<Result<TranslationResult, Error>>, Error> {
        let (done_tx, done_rx) = oneshot::channel();

        if request.is_same_language() {
            let _ = done_tx.send(Ok(TranslationResult::identity(&request)));
            return Ok(done_rx);
        }

        {
            let mut state = self.inner.state.lock();
            if state.buckets.len() >= self.inner.config.capacity {
                return Err(Error::TranslationQueueFull {
                    capacity: self.inner.config.capacity,
                });
            }
            state.buckets.push(Job {
                request,
                done: done_tx,
            });
        }

        self.dispatch();
        Ok(done_rx)
    }

    /// Spawn runners while worker slots and queued jobs both exist.
    fn dispatch(&self) {
        loop {
            let job = {
                let mut state = self.inner.state.lock();
                if state.active >= self.inner.config.concurrency {
                    return;
                }
                match state.buckets.pop() {
                    Some(job) => {
                        state.active += 1;
                        job
                    }
                    None => return,
                }
            };

            let queue = self.clone();
            tokio::spawn(async move {
                queue.run_job(job).await;
                queue.inner.state.lock().active -= 1;
                queue.dispatch();
            });
        }
    }

    async fn run_job(&self, job: Job) {
        let Job { request, done } = job;
        let handler = self.inner.handler.lock().clone();
        let Some(handler) = handler else {
            let err = Error::TranslationFailed("no translation handler installed".into());
            self.notify_error(&request, &err);
            let _ = done.send(Err(err));
            return;
        };

        let started = Instant::now();
        let mut cancel_rx = self.inner.cancel_tx.subscribe();

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.inner.config.request_timeout, handler.translate(&request)) => {
                match result {
                    Ok(Ok(translated)) => Ok(TranslationResult {
                        segment_id: request.segment_id.clone(),
                        source_text: request.source_text.clone(),
                        target_text: translated.text,
                        is_final: true,
                        confidence: LLM_CONFIDENCE,
                        first_paint_ms: translated.first_paint_ms.unwrap_or(0),
                        complete_ms: started.elapsed().as_millis() as u64,
                    }),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(Error::TranslationTimeout {
                        segment_id: request.segment_id.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }),
                }
            }
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                Err(Error::TranslationFailed("cancelled: pipeline stopping".into()))
            }
        };

        if let Err(err) = &outcome {
            self.notify_error(&request, err);
        }
        let _ = done.send(outcome);
    }

    fn notify_error(&self, request: &TranslationRequest, err: &Error) {
        tracing::warn!(
            segment_id = %request.segment_id,
            kind = ?request.kind,
            code = err.code(),
            "translation request failed: {err}"
        );
        let handler = self.inner.error_handler.lock().clone();
        if let Some(handler) = handler {
            handler(request, err);
        }
    }

    /// Shutdown drain: wait for in-flight and queued work up to `grace`,
    /// then fail the queued remainder and cancel in-flight jobs with a
    /// typed error.
    pub async fn drain(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.is_idle() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if self.is_idle() {
            return;
        }

        let abandoned = self.inner.state.lock().buckets.drain_all();
        let count = abandoned.len();
        for job in abandoned {
            let err = Error::TranslationFailed("cancelled: pipeline stopping".into());
            self.notify_error(&job.request, &err);
            let _ = job.done.send(Err(err));
        }
        let _ = self.inner.cancel_tx.send(true);
        tracing::warn!(abandoned = count, in_flight = self.active(), "queue drain grace expired");

        // Give in-flight runners a moment to observe cancellation.
        let settle = Instant::now() + Duration::from_millis(250);
        while self.active() > 0 && Instant::now() < settle {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use univoice_core::{Language, TranslationKind};

    struct EchoHandler {
        delay: Duration,
        started: Arc<Mutex<Vec<(String, Instant)>>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TranslationHandler for EchoHandler {
        async fn translate(&self, request: &TranslationRequest) -> Result<Translated, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().push((request.segment_id.clone(), Instant::now()));
            tokio::time::sleep(self.delay).await;
            Ok(Translated {
                text: format!("[{}] translated", request.segment_id),
                first_paint_ms: Some(1),
            })
        }
    }

    fn request(id: &str, priority: TranslationPriority) -> TranslationRequest {
        TranslationRequest {
            segment_id: id.to_string(),
            source_text: "Hello world.".into(),
            source_language: Language::parse("en").unwrap(),
            target_language: Language::parse("ja").unwrap(),
            priority,
            kind: TranslationKind::Realtime,
        }
    }

    fn queue_with(delay: Duration) -> (TranslationQueue, Arc<Mutex<Vec<(String, Instant)>>>, Arc<AtomicUsize>) {
        let queue = TranslationQueue::new(QueueConfig {
            concurrency: 3,
            capacity: 10,
            request_timeout: Duration::from_secs(5),
        });
        let started = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        queue.set_handler(Arc::new(EchoHandler {
            delay,
            started: started.clone(),
            calls: calls.clone(),
        }));
        (queue, started, calls)
    }

    #[tokio::test]
    async fn resolves_with_terminal_result() {
        let (queue, _, _) = queue_with(Duration::from_millis(5));
        let rx = queue.enqueue(request("s1", TranslationPriority::Normal)).unwrap();
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.target_text, "[s1] translated");
        assert!(result.is_final);
        assert!(result.complete_ms >= 5);
    }

    #[tokio::test]
    async fn same_language_short_circuits_without_handler_call() {
        let (queue, _, calls) = queue_with(Duration::from_millis(5));
        let mut req = request("s1", TranslationPriority::Normal);
        req.target_language = Language::parse("en").unwrap();
        let result = queue.enqueue(req).unwrap().await.unwrap().unwrap();
        assert_eq!(result.target_text, "Hello world.");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.complete_ms, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queue_full_rejects_with_typed_error() {
        let queue = TranslationQueue::new(QueueConfig {
            concurrency: 1,
            capacity: 2,
            request_timeout: Duration::from_secs(5),
        });
        let started = Arc::new(Mutex::new(Vec::new()));
        queue.set_handler(Arc::new(EchoHandler {
            delay: Duration::from_secs(10),
            started,
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        // One running + two queued fills the queue.
        let _rx1 = queue.enqueue(request("s1", TranslationPriority::Low)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _rx2 = queue.enqueue(request("s2", TranslationPriority::Low)).unwrap();
        let _rx3 = queue.enqueue(request("s3", TranslationPriority::Low)).unwrap();
        let err = queue.enqueue(request("s4", TranslationPriority::Low)).unwrap_err();
        assert_eq!(err.code(), "translation_queue_full");
    }

    #[tokio::test]
    async fn normal_starts_before_queued_low() {
        let queue = TranslationQueue::new(QueueConfig {
            concurrency: 1,
            capacity: 20,
            request_timeout: Duration::from_secs(5),
        });
        let started = Arc::new(Mutex::new(Vec::new()));
        queue.set_handler(Arc::new(EchoHandler {
            delay: Duration::from_millis(30),
            started: started.clone(),
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        // Saturate with low work, then enqueue a normal task.
        let mut receivers = Vec::new();
        for i in 0..4 {
            receivers.push(
                queue
                    .enqueue(request(&format!("low{i}"), TranslationPriority::Low))
                    .unwrap(),
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        receivers.push(queue.enqueue(request("norm", TranslationPriority::Normal)).unwrap());

        for rx in receivers {
            let _ = rx.await;
        }

        let order: Vec<String> = started.lock().iter().map(|(id, _)| id.clone()).collect();
        let norm_pos = order.iter().position(|id| id == "norm").unwrap();
        // low0 was already running; every other low task starts after norm.
        for (i, id) in order.iter().enumerate() {
            if id.starts_with("low") && id != "low0" {
                assert!(i > norm_pos, "low task {id} started before normal");
            }
        }
    }

    #[tokio::test]
    async fn timeout_produces_typed_error_and_error_handler_fires() {
        let queue = TranslationQueue::new(QueueConfig {
            concurrency: 1,
            capacity: 5,
            request_timeout: Duration::from_millis(30),
        });
        queue.set_handler(Arc::new(EchoHandler {
            delay: Duration::from_secs(10),
            started: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_clone = observed.clone();
        queue.set_error_handler(Arc::new(move |req, err| {
            observed_clone.lock().push((req.segment_id.clone(), err.code()));
        }));

        let rx = queue.enqueue(request("s7", TranslationPriority::Normal)).unwrap();
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "translation_timeout");
        assert_eq!(observed.lock()[0], ("s7".to_string(), "translation_timeout"));
    }

    #[tokio::test]
    async fn drain_cancels_queued_and_in_flight() {
        let queue = TranslationQueue::new(QueueConfig {
            concurrency: 1,
            capacity: 10,
            request_timeout: Duration::from_secs(30),
        });
        queue.set_handler(Arc::new(EchoHandler {
            delay: Duration::from_secs(10),
            started: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }));

        let rx_running = queue.enqueue(request("running", TranslationPriority::Normal)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let rx_queued = queue.enqueue(request("queued", TranslationPriority::Normal)).unwrap();

        queue.drain(Duration::from_millis(50)).await;

        let err = rx_queued.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "translation_failed");
        let err = rx_running.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "translation_failed");
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn drain_waits_for_fast_work() {
        let (queue, _, _) = queue_with(Duration::from_millis(10));
        let rx = queue.enqueue(request("s1", TranslationPriority::Normal)).unwrap();
        queue.drain(Duration::from_secs(1)).await;
        // Completed normally, not cancelled.
        assert!(rx.await.unwrap().is_ok());
    }
}
