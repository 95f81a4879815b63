//! API error types.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use clipper_queue::QueueError;
use clipper_storage::StorageError;
use clipper_store::StoreError;

use crate::services::SubmissionError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    /// Carries the job's error detail verbatim.
    #[error("{0}")]
    JobFailed(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_)
            | ApiError::Store(StoreError::NotFound(_))
            | ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_)
            | ApiError::InvalidRange(_)
            | ApiError::Store(StoreError::InvalidRange(_)) => StatusCode::BAD_REQUEST,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::JobFailed(_) => StatusCode::GONE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Store(_) | ApiError::Queue(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code.
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::NotFound(_)
            | ApiError::Store(StoreError::NotFound(_))
            | ApiError::Storage(StorageError::NotFound(_)) => "NotFound",
            ApiError::BadRequest(_) => "InvalidRequest",
            ApiError::InvalidRange(_) | ApiError::Store(StoreError::InvalidRange(_)) => "InvalidRange",
            ApiError::NotReady(_) => "NotReady",
            ApiError::JobFailed(_) => "JobFailed",
            ApiError::RateLimited => "RateLimited",
            ApiError::Internal(_) | ApiError::Store(_) | ApiError::Queue(_) | ApiError::Storage(_) => {
                "Internal"
            }
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::InvalidRange(msg) => ApiError::InvalidRange(msg),
            SubmissionError::NotFound(id) => ApiError::NotFound(format!("job {id}")),
            SubmissionError::NotReady { id, state } => {
                ApiError::NotReady(format!("job {id} is {state}"))
            }
            SubmissionError::JobFailed { error_detail, .. } => ApiError::JobFailed(error_detail),
            SubmissionError::Store(e) => ApiError::Store(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
    #[serde(rename = "errorDetail", skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && std::env::var("ENVIRONMENT")
                .map(|env| env.eq_ignore_ascii_case("production"))
                .unwrap_or(false)
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let error_detail = match &self {
            ApiError::JobFailed(detail) => Some(detail.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            detail,
            code,
            error_detail,
        };

        if matches!(self, ApiError::RateLimited) {
            return (status, [(header::RETRY_AFTER, "1")], Json(body)).into_response();
        }
        (status, Json(body)).into_response()
    }
}
