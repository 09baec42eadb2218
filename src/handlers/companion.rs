//! Session control and read-only views of the companion for the renderer.

use crate::companion::orchestrator::StartRequest;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// POST /api/v1/session/start
///
/// Replies as soon as the transport is connecting. Whether the service
/// accepted the session shows up later in `/api/v1/state`.
pub async fn start_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    let request = StartRequest {
        url: config.live_url(),
        live: config.live,
        audio: config.audio,
    };

    let session_id = state.companion.start(request).await?;
    info!(session_id = %session_id, "Session requested");

    Ok(HttpResponse::Accepted().json(json!({
        "status": "connecting",
        "session_id": session_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// POST /api/v1/session/stop
pub async fn stop_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stopped = state.companion.stop().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": if stopped { "stopped" } else { "idle" },
        "stopped": stopped,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// GET /api/v1/state
pub async fn get_state(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.companion.snapshot();

    Ok(HttpResponse::Ok().json(json!({
        "avatar": snapshot.avatar,
        "session": snapshot.session,
        "last_error": snapshot.last_error,
        "updated_at": snapshot.updated_at.to_rfc3339()
    })))
}

/// GET /api/v1/avatar
///
/// Everything the renderer needs for one frame of animation.
pub async fn get_avatar(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.companion.snapshot();
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "emotion": snapshot.avatar.emotion,
        "is_speaking": snapshot.avatar.is_speaking,
        "is_connected": snapshot.avatar.is_connected,
        "model_url": config.avatar.model_url,
        "animation_intensity": config.avatar.animation_intensity
    })))
}

/// GET /api/v1/transcripts (oldest first)
pub async fn get_transcripts(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.companion.snapshot();
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "show_transcript": config.avatar.show_transcript,
        "count": snapshot.transcripts.len(),
        "entries": snapshot.transcripts
    })))
}

pub async fn get_memory(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let snapshot = state.companion.snapshot();

    Ok(HttpResponse::Ok().json(json!({
        "memory": snapshot.memory,
        "path": state.get_config().memory.path
    })))
}
