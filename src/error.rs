//! # Error Handling
//!
//! Two error families live here:
//! - [`AppError`]: failures of HTTP requests and WebSocket upgrades, converted
//!   to JSON HTTP responses through actix's `ResponseError` trait.
//! - [`PipelineError`]: failures inside the voice client's audio pipeline
//!   (decoding, device I/O, socket). These are logged and the pipeline keeps
//!   running; only connection setup surfaces them to the caller.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "config_error",
//!     "message": "OpenAI API key not found in environment variables",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **Forbidden**: Origin is not on the allow list (403)
/// - **ConfigError**: Missing credential or broken configuration (500)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    Forbidden(String),
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Maps each variant to a status code and a machine-readable type.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - Forbidden → 403 (Forbidden)
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::Forbidden(msg) => ("forbidden", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised inside the audio pipeline and the voice client.
///
/// ## Failure policy:
/// - `Decode` / `Playback`: per-chunk, the chunk is dropped and playback continues
/// - `Malformed`: an inbound message could not be parsed and is dropped
/// - `ConnectTimeout` / `Connection`: the socket could not be opened
/// - `Device`: the capture or output device failed
#[derive(Debug)]
pub enum PipelineError {
    Decode(String),
    Playback(String),
    Malformed(String),
    ConnectTimeout(u64),
    Connection(String),
    Device(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Decode(msg) => write!(f, "Decode error: {}", msg),
            PipelineError::Playback(msg) => write!(f, "Playback error: {}", msg),
            PipelineError::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            PipelineError::ConnectTimeout(ms) => {
                write!(f, "Connection not open after {}ms", ms)
            }
            PipelineError::Connection(msg) => write!(f, "Connection error: {}", msg),
            PipelineError::Device(msg) => write!(f, "Audio device error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<base64::DecodeError> for PipelineError {
    fn from(err: base64::DecodeError) -> Self {
        PipelineError::Decode(format!("invalid base64: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Connection(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
