//! # Error Handling
//!
//! This module defines the error taxonomy for the upload pipeline and how each
//! error is converted into an HTTP response.
//!
//! ## Error Categories:
//! - **Caller mistakes**: `EmptyChunk`, `InvalidArgument` (400 errors)
//! - **Unknown/expired session**: `NoSession` (404 errors)
//! - **Lifecycle conflicts**: `AlreadyFinalized`, `NoStream` (409 errors)
//! - **Encoder failures**: `EncodingFailed` with the captured process log (500 errors)
//! - **Storage problems**: `Internal` for I/O and everything else fatal (500 errors)
//!
//! ## Propagation policy:
//! Validation and state-precondition failures are surfaced immediately with no
//! retry. I/O and encoder failures are fatal for that call; the session is left
//! in whatever status it had reached. Nothing in this module retries.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Everything that can go wrong while handling an upload request.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::InvalidArgument("totalChunks required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// The upload id is unknown, or the session has already been cleaned up
    NoSession,

    /// The session is no longer in `UPLOADING`, so appends and finalize are rejected
    AlreadyFinalized,

    /// The client posted a chunk with an empty payload
    EmptyChunk,

    /// Malformed caller input (bad multipart payload, non-positive totalChunks, ...)
    InvalidArgument(String),

    /// Finalize was attempted before any chunk bytes were appended
    NoStream,

    /// The external encoder exited with a non-zero status; the combined
    /// stdout/stderr log is attached for diagnosis
    EncodingFailed { code: i32, log: String },

    /// Fatal server-side failures (directory/file creation, process spawn, ...)
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NoSession => write!(f, "No such upload session"),
            AppError::AlreadyFinalized => {
                write!(f, "Upload session is no longer accepting this operation")
            }
            AppError::EmptyChunk => write!(f, "Empty chunk"),
            AppError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            AppError::NoStream => write!(f, "No stream data was appended to this session"),
            AppError::EncodingFailed { code, .. } => {
                write!(f, "Encoder exited with status {}", code)
            }
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Conversion of errors into the JSON error envelope every endpoint shares.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "already_finalized",
///     "message": "Upload session is no longer accepting this operation",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
///
/// `encoding_failed` responses additionally carry a `log` field with the
/// captured encoder output. Internal filesystem paths never appear in any
/// response beyond what is already part of the returned storage key.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = match self {
            AppError::NoSession => (actix_web::http::StatusCode::NOT_FOUND, "no_session"),
            AppError::AlreadyFinalized => (actix_web::http::StatusCode::CONFLICT, "already_finalized"),
            AppError::EmptyChunk => (actix_web::http::StatusCode::BAD_REQUEST, "empty_chunk"),
            AppError::InvalidArgument(_) => {
                (actix_web::http::StatusCode::BAD_REQUEST, "invalid_argument")
            }
            AppError::NoStream => (actix_web::http::StatusCode::CONFLICT, "no_stream"),
            AppError::EncodingFailed { .. } => {
                (actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "encoding_failed")
            }
            AppError::Internal(_) => {
                (actix_web::http::StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let mut body = json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        });

        // Encoder failures are only diagnosable with the process log attached.
        if let AppError::EncodingFailed { log, .. } = self {
            body["error"]["log"] = json!(log);
        }

        HttpResponse::build(status).json(body)
    }
}

/// I/O failures are fatal to the call that hit them and surface as 500s.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`, used throughout the upload pipeline.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NoSession.error_response().status().as_u16(), 404);
        assert_eq!(AppError::AlreadyFinalized.error_response().status().as_u16(), 409);
        assert_eq!(AppError::EmptyChunk.error_response().status().as_u16(), 400);
        assert_eq!(AppError::NoStream.error_response().status().as_u16(), 409);
        let failed = AppError::EncodingFailed { code: 1, log: "boom".to_string() };
        assert_eq!(failed.error_response().status().as_u16(), 500);
    }

    #[test]
    fn test_encoding_failed_display_carries_exit_code() {
        let err = AppError::EncodingFailed { code: 187, log: String::new() };
        assert!(err.to_string().contains("187"));
    }
}
