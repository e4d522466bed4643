// backend/src/errors.rs
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

// All variants carry String payloads so the error stays Clone; stream
// plumbing hands errors across threads and mock scripting clones them.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    // --- Request/Input Errors ---
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Invalid history: {0}")]
    HistoryFormatError(String),

    // --- Cache/Content Errors ---
    #[error("Book content unavailable: {0}")]
    ContentUnavailable(String),

    #[error("Cache initialization failed: {0}")]
    CacheInitError(String),

    // --- External Service Errors ---
    #[error("LLM API error: {0}")]
    GeminiError(String),

    #[error("Upstream stream error: {0}")]
    UpstreamStreamError(String),

    #[error("HTTP Request Error: {0}")]
    HttpRequestError(String),

    // --- General/Internal Errors ---
    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("IO Error: {0}")]
    IoError(String),

    #[error("Serialization Error: {0}")]
    SerializationError(String),

    #[error("Internal Server Error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            // 4xx Client Errors
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::HistoryFormatError(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid history: {}", msg),
            ),

            // 5xx Server Errors
            AppError::ContentUnavailable(e) => {
                error!("Book content unavailable: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Book content is unavailable".to_string(),
                )
            }
            AppError::CacheInitError(e) => {
                error!("Cache initialization failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AI cache initialization failed".to_string(),
                )
            }
            AppError::GeminiError(e) => {
                error!("LLM API error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AI service error".to_string(),
                )
            }
            AppError::UpstreamStreamError(e) => {
                // Normally surfaced as an in-band SSE event; reaching here means
                // the failure happened before the stream was committed.
                error!("Upstream stream error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AI streaming error".to_string(),
                )
            }
            AppError::HttpRequestError(e) => {
                error!("HTTP Request Error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to communicate with external service".to_string(),
                )
            }
            AppError::ConfigError(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                )
            }
            AppError::IoError(e) => {
                error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "File system or network error".to_string(),
                )
            }
            AppError::SerializationError(e) => {
                error!("Serialization error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Data formatting error".to_string(),
                )
            }
            AppError::InternalServerError(e) => {
                error!("Internal Server Error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// --- Convenience Result Type ---
pub type Result<T, E = AppError> = std::result::Result<T, E>;

// --- From implementations, converting to our string versions ---
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::HttpRequestError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}
