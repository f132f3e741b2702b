//! Shared application state.

use parking_lot::Mutex;
use std::sync::Arc;

use univoice_core::{EventEnvelope, PipelineEvent};
use univoice_pipeline::PipelineHandle;

/// State shared across connections. The pipeline handle is the only route
/// to business state; the server itself keeps nothing but the last status
/// envelope for replay to late-joining clients.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: PipelineHandle,
    last_status: Arc<Mutex<Option<EventEnvelope>>>,
}

impl AppState {
    pub fn new(pipeline: PipelineHandle) -> Self {
        let last_status = Arc::new(Mutex::new(None));

        // Track the latest status so a freshly connected UI immediately
        // knows the pipeline state.
        let tracker = last_status.clone();
        let mut events = pipeline.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(envelope) => {
                        if matches!(envelope.event, PipelineEvent::Status(_)) {
                            *tracker.lock() = Some(envelope);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "status tracker lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            pipeline,
            last_status,
        }
    }

    pub fn last_status(&self) -> Option<EventEnvelope> {
        self.last_status.lock().clone()
    }
}
