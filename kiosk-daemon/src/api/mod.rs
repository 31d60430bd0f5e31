//! HTTP API for kioskd
//!
//! Command bus transport, status, button input and the SSE event stream.

pub mod handlers;
pub mod sse;

use crate::session::{SessionHistory, SessionOrchestrator};
use crate::triggers::command_bus::CommandBus;
use crate::triggers::secret_sequence::InputButton;
use crate::video::DecodePipeline;
use axum::{
    routing::{get, post},
    Router,
};
use kiosk_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub pipeline: Option<Arc<DecodePipeline>>,
    pub bus: EventBus,
    pub commands: CommandBus,
    /// Secret-sequence listener input; None when that trigger is off
    pub input_tx: Option<mpsc::Sender<InputButton>>,
    pub history: Option<SessionHistory>,
}

/// Build the router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            Router::new()
                .route("/command", post(handlers::post_command))
                .route("/status", get(handlers::get_status))
                .route("/input", post(handlers::post_input))
                .route("/history", get(handlers::get_history))
                .route("/events", get(sse::event_stream)),
        )
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
