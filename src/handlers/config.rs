use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// Configuration as shown to the panel. The API key never leaves the process.
fn public_config(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "live": {
            "endpoint": config.live.endpoint,
            "model": config.live.model,
            "voice": config.live.voice,
            "api_key_set": !config.live.api_key.is_empty()
        },
        "audio": {
            "input": config.audio.input,
            "input_wav_path": config.audio.input_wav_path,
            "output": config.audio.output,
            "capture_sample_rate": config.audio.capture_sample_rate,
            "playback_sample_rate": config.audio.playback_sample_rate,
            "frame_size": config.audio.frame_size,
            "sensitivity": config.audio.sensitivity
        },
        "avatar": {
            "model_url": config.avatar.model_url,
            "animation_intensity": config.avatar.animation_intensity,
            "show_transcript": config.avatar.show_transcript,
            "theme": config.avatar.theme
        },
        "memory": {
            "path": config.memory.path,
            "transcript_capacity": config.memory.transcript_capacity
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": public_config(&config)
    })))
}

/// `PUT /api/v1/config` with a partial body, e.g. `{"audio": {"sensitivity": 1.5}}`.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let current_config = state
        .modify_config(|config| config.update_from_json(&json_str))
        .map_err(AppError::ValidationError)?;

    info!(
        sensitivity = current_config.audio.sensitivity,
        theme = %current_config.avatar.theme,
        "Configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": public_config(&current_config)
    })))
}
