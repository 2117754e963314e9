use super::state::AppState;
use crate::error::SessionError;
use crate::session::{SessionState, SessionStats};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub state: SessionState,
    pub message: String,
    pub elapsed_secs: f64,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::Busy(_) => StatusCode::CONFLICT,
        SessionError::NoRecording => StatusCode::NOT_FOUND,
        SessionError::PermissionDenied => StatusCode::FORBIDDEN,
        SessionError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(action: &str, err: SessionError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Failed to {}: {}", action, err);
    } else {
        info!("Rejected request to {}: {}", action, err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn control_response(state: &AppState, message: &str) -> Response {
    (
        StatusCode::OK,
        Json(ControlResponse {
            state: state.session.state(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
/// Start recording into a fresh backing store
pub async fn start_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.start_recording().await {
        Ok(()) => control_response(&state, "Recording started"),
        Err(e) => error_response("start recording", e),
    }
}

/// POST /recording/stop
/// Stop recording; a no-op when nothing is being recorded
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.stop_recording().await {
        Ok(elapsed) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                state: state.session.state(),
                message: "Recording stopped".to_string(),
                elapsed_secs: elapsed.as_secs_f64(),
                stats: state.session.stats(),
            }),
        )
            .into_response(),
        Err(e) => error_response("stop recording", e),
    }
}

/// POST /playback/start
/// Play the backing store from the beginning
pub async fn start_playback(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.start_playback().await {
        Ok(()) => control_response(&state, "Playback started"),
        Err(e) => error_response("start playback", e),
    }
}

/// POST /playback/stop
/// Stop playback; a no-op when nothing is playing
pub async fn stop_playback(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.stop_playback().await {
        Ok(()) => control_response(&state, "Playback stopped"),
        Err(e) => error_response("stop playback", e),
    }
}

/// GET /status
/// Get status of the session
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.stats()))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
