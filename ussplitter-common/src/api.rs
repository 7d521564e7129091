//! HTTP request/response bodies shared by server and client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// POST /jobs response (202 Accepted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub model: String,
}

/// GET /jobs/{id} response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub model: String,
    /// Present only when status is FAILED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// GET /jobs response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusResponse>,
}

/// DELETE /jobs/{id} response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub job_id: String,
    pub acknowledged: bool,
}

/// POST /jobs/cleanup response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupAllResponse {
    pub removed: usize,
}

/// GET /models response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub default_model: String,
    pub models: Vec<String>,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error code used when a job ended in FAILED and its result is requested
pub const JOB_FAILED_CODE: &str = "JOB_FAILED";
