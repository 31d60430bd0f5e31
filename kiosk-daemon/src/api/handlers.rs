//! HTTP request handlers

use super::AppContext;
use crate::session::{SessionRecord, SessionSnapshot};
use crate::triggers::command_bus::{CommandMessage, CommandResponse, CommandStatus};
use crate::triggers::secret_sequence::InputButton;
use crate::video::PipelineStats;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

impl StatusResponse {
    fn new(status: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: status.into(),
        })
    }
}

type ApiError = (StatusCode, Json<StatusResponse>);

#[derive(Debug, Serialize)]
pub struct KioskStatusResponse {
    pub session: SessionSnapshot,
    pub pipeline: Option<PipelineStats>,
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub button: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub sessions: Vec<SessionRecord>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "kioskd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/v1/command - command bus intent
pub async fn post_command(
    State(ctx): State<AppContext>,
    Json(message): Json<CommandMessage>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    debug!("Command received: {:?}", message);
    match ctx.commands.handle(message).await {
        Ok(response) => Ok((status_code_for(response.status), Json(response))),
        Err(e) => {
            error!("Command failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, StatusResponse::new(format!("error: {}", e))))
        }
    }
}

fn status_code_for(status: CommandStatus) -> StatusCode {
    match status {
        CommandStatus::Accepted => StatusCode::ACCEPTED,
        CommandStatus::Rejected => StatusCode::CONFLICT,
        CommandStatus::InvalidPlayer => StatusCode::BAD_REQUEST,
        CommandStatus::LaunchFailed => StatusCode::INTERNAL_SERVER_ERROR,
        CommandStatus::Stopped
        | CommandStatus::NotRunning
        | CommandStatus::Status
        | CommandStatus::Ignored => StatusCode::OK,
    }
}

/// GET /api/v1/status
pub async fn get_status(State(ctx): State<AppContext>) -> Json<KioskStatusResponse> {
    Json(KioskStatusResponse {
        session: ctx.orchestrator.snapshot(),
        pipeline: ctx.pipeline.as_ref().map(|p| p.stats()),
    })
}

/// POST /api/v1/input - inject a button press into the secret-sequence detector
pub async fn post_input(
    State(ctx): State<AppContext>,
    Json(request): Json<InputRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let button: InputButton = request
        .button
        .parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, StatusResponse::new(format!("error: {}", e))))?;

    let Some(tx) = ctx.input_tx.as_ref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            StatusResponse::new("secret sequence disabled"),
        ));
    };

    match tx.try_send(button) {
        Ok(()) => Ok((StatusCode::ACCEPTED, StatusResponse::new("queued"))),
        Err(TrySendError::Full(_)) => Err((StatusCode::SERVICE_UNAVAILABLE, StatusResponse::new("input busy"))),
        Err(TrySendError::Closed(_)) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            StatusResponse::new("secret sequence stopped"),
        )),
    }
}

/// GET /api/v1/history?limit=N
pub async fn get_history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Some(history) = ctx.history.as_ref() else {
        return Err((StatusCode::NOT_FOUND, StatusResponse::new("history disabled")));
    };

    let limit = query.limit.unwrap_or(20).clamp(1, 500);
    match history.recent(limit).await {
        Ok(sessions) => Ok(Json(HistoryResponse { sessions })),
        Err(e) => {
            error!("Failed to read session history: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, StatusResponse::new(format!("error: {}", e))))
        }
    }
}
