use super::state::AppState;
use crate::error::RecordingError;
use crate::format::RecordingFormat;
use crate::session::{SessionEntry, SessionToken};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub session_token: SessionToken,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchFormatRequest {
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct SwitchFormatResponse {
    pub format: RecordingFormat,
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub recording: bool,
    pub duration_secs: f64,
    #[serde(flatten)]
    pub entry: SessionEntry,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable message key, see `RecordingError::message_key`
    pub key: String,
}

fn error_response(e: RecordingError) -> Response {
    let status = match e {
        RecordingError::NotModerator => StatusCode::FORBIDDEN,
        RecordingError::UnknownFormat(_) => StatusCode::BAD_REQUEST,
        RecordingError::DeviceUnavailable { .. } => StatusCode::CONFLICT,
        RecordingError::UnknownSession(_) => StatusCode::NOT_FOUND,
        RecordingError::CoordinatorStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            key: e.message_key().to_string(),
        }),
    )
        .into_response()
}

fn ok(status: &str, message: String) -> Response {
    (
        StatusCode::OK,
        Json(StatusResponse {
            status: status.to_string(),
            message,
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
/// Start a new session for the whole conference
pub async fn start_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.start_recording().await {
        Ok(session_token) => {
            info!("Session {} started via API", session_token);
            (
                StatusCode::OK,
                Json(StartRecordingResponse {
                    session_token,
                    status: "recording".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start recording: {}", e);
            error_response(e)
        }
    }
}

/// POST /recording/stop
/// Stop the current session for the whole conference
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.stop_recording().await {
        Ok(()) => ok("stopped", "Recording stopped".to_string()),
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            error_response(e)
        }
    }
}

/// POST /recording/format
pub async fn switch_format(
    State(state): State<AppState>,
    Json(req): Json<SwitchFormatRequest>,
) -> impl IntoResponse {
    match state.coordinator.switch_format(&req.format).await {
        Ok(format) => (StatusCode::OK, Json(SwitchFormatResponse { format })).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /recording/mute
pub async fn set_muted(
    State(state): State<AppState>,
    Json(req): Json<MuteRequest>,
) -> impl IntoResponse {
    match state.coordinator.set_muted(req.muted).await {
        Ok(()) => {
            let status = if req.muted { "muted" } else { "unmuted" };
            ok(status, format!("Microphone {}", status))
        }
        Err(e) => error_response(e),
    }
}

/// POST /recording/device
pub async fn set_mic_device(
    State(state): State<AppState>,
    Json(req): Json<DeviceRequest>,
) -> impl IntoResponse {
    match state.coordinator.set_mic_device(&req.device_id).await {
        Ok(()) => ok("ok", format!("Microphone set to {}", req.device_id)),
        Err(e) => error_response(e),
    }
}

/// GET /recording/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /recording/stats
/// Recording stats of every participant
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.participants_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /recording/sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.sessions().await {
        Ok(sessions) => {
            let summaries: Vec<SessionSummary> = sessions
                .into_iter()
                .map(|entry| SessionSummary {
                    recording: entry.has_open_segment(),
                    duration_secs: entry.duration().num_milliseconds() as f64 / 1000.0,
                    entry,
                })
                .collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /recording/sessions/:token/export
/// Export a stopped session again and re-run its upload
pub async fn export_session(
    State(state): State<AppState>,
    Path(token): Path<u64>,
) -> impl IntoResponse {
    let token = SessionToken(token);
    match state.coordinator.export_session(token).await {
        Ok(()) => ok("exporting", format!("Session {} queued for upload", token)),
        Err(e) => {
            error!("Failed to export session {}: {}", token, e);
            error_response(e)
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
