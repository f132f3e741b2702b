//! IPC server: the typed command/event transport between the pipeline
//! process and the UI process.
//!
//! Two WebSocket endpoints: `/ws` carries JSON commands in and enveloped
//! events out; `/ws/audio` is a unidirectional binary channel for PCM16
//! frames. Every message is validated against a compiled schema on the way
//! in and out; invalid messages are dropped with a structured log entry.

pub mod ipc;
pub mod state;
pub mod websocket;

pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(websocket::ws_events))
        .route("/ws/audio", get(websocket::ws_audio))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
