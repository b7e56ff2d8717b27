use crate::protocol::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;
use std::io;

/// Failure inside a pipeline stage.
#[derive(Debug, Clone)]
pub enum PipelineError {
    Transient(String),
    Permanent(String),
    /// The project record is gone; the job is abandoned without a dead letter.
    Missing,
}

impl PipelineError {
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }
    pub fn permanent<S: Into<String>>(msg: S) -> Self {
        Self::Permanent(msg.into())
    }
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
    pub fn message(&self) -> &str {
        match self {
            PipelineError::Transient(s) | PipelineError::Permanent(s) => s.as_str(),
            PipelineError::Missing => "project record no longer exists",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

pub fn classify_io_error(context: &str, e: &io::Error) -> PipelineError {
    let msg = format!("{}: {}", context, e);
    match e.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            PipelineError::transient(msg)
        }
        _ => PipelineError::permanent(msg),
    }
}

/// Error returned by HTTP handlers, rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(s)
            | ApiError::NotFound(s)
            | ApiError::PayloadTooLarge(s)
            | ApiError::Unavailable(s)
            | ApiError::Internal(s) => s.as_str(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.message().to_string() };
        (self.status_code(), Json(body)).into_response()
    }
}
