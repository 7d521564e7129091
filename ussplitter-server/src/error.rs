//! Error types for ussplitter-server
//!
//! [`JobError`] is what the job manager reports; [`ApiError`] is its HTTP
//! rendering. Separation failures never show up here directly: they are
//! stored on the job and surface later as [`JobError::Failed`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use ussplitter_common::api::{ErrorBody, ErrorDetail, JOB_FAILED_CODE};
use ussplitter_common::{JobId, JobStatus};

/// Job manager errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Unknown id, or already cleaned up
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Result requested while QUEUED or PROCESSING
    #[error("Job {job_id} is not ready (status {status})")]
    NotReady { job_id: JobId, status: JobStatus },

    /// Result requested for a FAILED job; carries the stored diagnostic
    #[error("Job {job_id} failed: {message}")]
    Failed { job_id: JobId, message: String },

    /// Too many QUEUED jobs; caller may retry later
    #[error("Queue is full ({limit} jobs waiting), retry later")]
    ResourceExhausted { limit: usize },

    /// Bad submission (empty audio, unknown model)
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - result requested before the job finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Job ended in FAILED (500 with the job's diagnostic)
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Queue full (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("Job not found: {}", id)),
            e @ JobError::NotReady { .. } => ApiError::Conflict(e.to_string()),
            JobError::Failed { message, .. } => ApiError::JobFailed(message),
            e @ JobError::ResourceExhausted { .. } => ApiError::ServiceUnavailable(e.to_string()),
            JobError::InvalidInput(msg) => ApiError::BadRequest(msg),
            JobError::Io(e) => ApiError::Io(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "NOT_READY", msg),
            ApiError::JobFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, JOB_FAILED_CODE, msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RESOURCE_EXHAUSTED", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(ErrorBody {
            error: ErrorDetail {
                code: error_code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
