//! # Error Handling
//!
//! Custom error types shared by the companion core and the local HTTP API.
//!
//! ## Error Sources:
//! - **Codec**: malformed base64 coming back from the speech service
//! - **Audio**: microphone/speaker/WAV problems (device missing, permission denied)
//! - **Session**: live transport failures and illegal lifecycle transitions
//! - **Config / Validation**: bad configuration files or runtime updates
//!
//! Every variant also maps to an HTTP response so handlers can simply return
//! `AppResult<HttpResponse>` and use `?`.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Codec("invalid base64".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Unexpected internal failures
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Request conflicts with the current companion state (e.g. double start)
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// PCM encode/decode failures
    Codec(String),

    /// Audio device or audio file problems
    Audio(String),

    /// Microphone could not be opened (missing device or permission denied)
    MicrophoneUnavailable(String),

    /// Live session transport or lifecycle errors
    Session(String),

    /// Memory store persistence failures
    Storage(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Codec(msg) => write!(f, "Codec error: {}", msg),
            AppError::Audio(msg) => write!(f, "Audio error: {}", msg),
            AppError::MicrophoneUnavailable(msg) => write!(f, "Microphone unavailable: {}", msg),
            AppError::Session(msg) => write!(f, "Session error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Machine-readable error type used in JSON bodies and WebSocket feeds.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Codec(_) => "codec_error",
            AppError::Audio(_) => "audio_error",
            AppError::MicrophoneUnavailable(_) => "microphone_unavailable",
            AppError::Session(_) => "session_error",
            AppError::Storage(_) => "storage_error",
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "Conflict: session already running",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) | AppError::Codec(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::MicrophoneUnavailable(_) | AppError::Session(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Internal(_)
            | AppError::ConfigError(_)
            | AppError::Audio(_)
            | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client, so they become 400s.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::Codec(format!("invalid base64 payload: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Storage(format!("corrupt memory file: {}", err))
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Storage(format!("cannot serialize memory: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_display_includes_category() {
        let err = AppError::Codec("bad padding".to_string());
        assert_eq!(err.to_string(), "Codec error: bad padding");

        let err = AppError::MicrophoneUnavailable("permission denied".to_string());
        assert_eq!(err.to_string(), "Microphone unavailable: permission denied");
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(AppError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::ValidationError("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::MicrophoneUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::Storage("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_base64_error_becomes_codec_error() {
        use base64::Engine as _;

        let err = base64::engine::general_purpose::STANDARD
            .decode("***")
            .unwrap_err();
        let app_err: AppError = err.into();
        assert_eq!(app_err.kind(), "codec_error");
    }

    #[test]
    fn test_json_error_becomes_bad_request() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::BadRequest(_)));
    }
}
