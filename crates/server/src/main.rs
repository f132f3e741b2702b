//! UniVoice pipeline process entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use univoice_audio::{AudioCapture, CaptureConfig};
use univoice_config::{constants, load_settings, Settings};
use univoice_llm::ChatGateway;
use univoice_pipeline::{
    CombinerConfig, HistoryConfig, LiveAsrSource, Pipeline, PipelineDeps, PipelineHandle,
    QueueConfig,
};
use univoice_server::{create_router, AppState};
use univoice_store::{resolve_root, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("UNIVOICE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized; early logging goes to stderr.
            eprintln!("warning: failed to load config ({e}); using defaults");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "starting UniVoice pipeline"
    );

    let root = resolve_root(settings.storage.data_path.clone());
    tracing::info!(root = %root.display(), "session store root");
    let store = SessionStore::new(root);

    let gateway = Arc::new(ChatGateway::new(
        settings.translation.endpoint.clone(),
        settings.translation.api_key.clone().unwrap_or_default(),
        Duration::from_secs(settings.translation.request_timeout_secs),
    )?);

    let deps = PipelineDeps {
        gateway,
        asr: Arc::new(LiveAsrSource::new(settings.asr.clone())),
        store,
        models: settings.models.clone(),
        queue_config: QueueConfig {
            concurrency: settings.translation.concurrency,
            capacity: settings.translation.queue_capacity,
            request_timeout: Duration::from_secs(settings.translation.request_timeout_secs),
        },
        combiner_config: CombinerConfig {
            max_segments: settings.pipeline.combiner_max_segments,
            min_segments: settings.pipeline.combiner_min_segments,
            timeout: Duration::from_millis(settings.pipeline.combiner_timeout_ms),
        },
        history_config: HistoryConfig {
            sentences_per_block: settings.pipeline.history_sentences_per_block,
            quiet_gap: Duration::from_millis(settings.pipeline.history_quiet_gap_ms),
            retain_sentence_targets: settings.pipeline.retain_sentence_targets,
        },
        progressive_summaries: settings.features.progressive_summaries,
        history_tier: settings.features.history_tier,
    };
    let pipeline = Pipeline::spawn(deps);

    // Optional in-process capture; the usual path is the renderer's audio
    // channel on /ws/audio.
    let _capture = if settings.server.local_capture {
        Some(start_local_capture(pipeline.clone())?)
    } else {
        None
    };

    let state = AppState::new(pipeline);
    let app = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], settings.server.port));
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn start_local_capture(pipeline: PipelineHandle) -> anyhow::Result<AudioCapture> {
    let (frame_tx, mut frame_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(256);
    let capture = AudioCapture::start(CaptureConfig::default(), frame_tx)
        .map_err(|e| anyhow::anyhow!("audio capture failed: {e}"))?;

    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            debug_assert_eq!(frame.len(), constants::audio::FRAME_BYTES);
            if pipeline.push_audio(frame).await.is_err() {
                break;
            }
        }
    });
    tracing::info!("local microphone capture enabled");
    Ok(capture)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("univoice={},tower_http=info", settings.server.log_level).into()
    });

    let fmt_layer = if settings.server.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
