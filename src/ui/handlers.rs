//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::audio::device::{list_devices, AudioDeviceInfo};
use crate::session::{SessionState, SessionStatus};
use crate::ui::server::AppState;
use crate::video::SnapshotFileSource;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Session snapshot
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionStatus>> {
    Json(ApiResponse::ok(state.controller.status()))
}

/// Available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    Json(ApiResponse::ok(list_devices()))
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

pub async fn set_mute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MuteRequest>,
) -> Json<ApiResponse<bool>> {
    if req.muted {
        state.controller.mute();
    } else {
        state.controller.unmute();
    }
    Json(ApiResponse::ok(state.controller.is_muted()))
}

#[derive(Debug, Deserialize)]
pub struct VideoRequest {
    pub enabled: bool,
}

/// Toggle camera sampling from the configured snapshot file
pub async fn set_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VideoRequest>,
) -> (StatusCode, Json<ApiResponse<bool>>) {
    if !req.enabled {
        state.controller.stop_video();
        return (StatusCode::OK, Json(ApiResponse::ok(false)));
    }

    let Some(path) = state.snapshot_path.clone() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("no camera snapshot configured")),
        );
    };

    match state
        .controller
        .start_video(Box::new(SnapshotFileSource::new(path)))
    {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(true))),
        Err(e) => (StatusCode::CONFLICT, Json(ApiResponse::error(e.to_string()))),
    }
}

pub async fn disconnect(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SessionState>> {
    info!("Disconnect requested from control panel");
    state.controller.disconnect();
    Json(ApiResponse::ok(state.controller.state()))
}
