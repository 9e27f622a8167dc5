//! Error taxonomy for the control plane.
//!
//! `WeaverError` carries a closed set of kinds, each mapping onto exactly one HTTP status
//! / error code pair at the API boundary. Internal callers match on variants directly
//! instead of parsing messages.

use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Conflict,
    BadRequest,
    InternalError,
    ServiceUnavailable,
    RunNotStartable,
    RunNotStoppable,
    InvalidRunMode,
}

#[derive(Debug, thiserror::Error)]
pub enum WeaverError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("run {0} is not startable")]
    RunNotStartable(String),

    #[error("run {0} is not stoppable")]
    RunNotStoppable(String),

    #[error("invalid run mode: {0}")]
    InvalidRunMode(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("exchange rejected order: {0}")]
    ExchangeRejection(String),

    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimit {
        message: String,
        retry_after_secs: u64,
    },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WeaverError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WeaverError::Validation(_) => ErrorCode::ValidationError,
            WeaverError::NotFound(_) => ErrorCode::NotFound,
            WeaverError::Conflict(_) => ErrorCode::Conflict,
            WeaverError::RunNotStartable(_) => ErrorCode::RunNotStartable,
            WeaverError::RunNotStoppable(_) => ErrorCode::RunNotStoppable,
            WeaverError::InvalidRunMode(_) => ErrorCode::InvalidRunMode,
            WeaverError::Connection(_) => ErrorCode::ServiceUnavailable,
            WeaverError::ExchangeRejection(_) => ErrorCode::BadRequest,
            WeaverError::RateLimit { .. } => ErrorCode::ServiceUnavailable,
            WeaverError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            WeaverError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Extra structured context beyond `message`, where the variant carries any. Kept
    /// separate from `message` so clients can branch on it without string-parsing.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            WeaverError::RateLimit { retry_after_secs, .. } => {
                Some(serde_json::json!({ "retry_after_secs": retry_after_secs }))
            }
            _ => None,
        }
    }

    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::RunNotStartable => StatusCode::CONFLICT,
            ErrorCode::RunNotStoppable => StatusCode::CONFLICT,
            ErrorCode::InvalidRunMode => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Every HTTP handler returns `WeaverResult<T>`, so errors reach the client through this
/// one place, already paired with the right status code via `code()`/`http_status()`. The
/// correlation id comes from the request-scoped task local the correlation-id middleware
/// sets; outside a request (a handler calling a component directly in a test) it's absent.
impl IntoResponse for WeaverError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
            correlation_id: crate::api::middleware::current_correlation_id(),
            timestamp: Utc::now(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type WeaverResult<T> = Result<T, WeaverError>;
