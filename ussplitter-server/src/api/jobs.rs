//! Job API handlers
//!
//! POST /jobs, GET /jobs, GET /jobs/:id, GET /jobs/:id/result,
//! DELETE /jobs/:id, POST /jobs/cleanup

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use ussplitter_common::api::{
    CleanupAllResponse, CleanupResponse, JobListResponse, JobStatusResponse, SubmitResponse,
};
use ussplitter_common::stems::boundary_for;
use ussplitter_common::{JobId, StemBundle};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /jobs query string
#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    /// Separation model; server default when absent
    pub model: Option<String>,
}

/// Ids that do not parse cannot name a job, so they are reported as unknown
fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("Job not found: {}", raw)))
}

/// POST /jobs
///
/// Body is the raw audio file. Returns 202 Accepted with the job id; the job
/// runs in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job = state.manager.submit(body, query.model).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id(),
            status: job.status(),
            model: job.model.clone(),
        }),
    ))
}

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs = state
        .manager
        .list()
        .await
        .iter()
        .map(|job| job.to_response())
        .collect();
    Json(JobListResponse { jobs })
}

/// GET /jobs/:id
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let id = parse_job_id(&job_id)?;
    let job = state.manager.get_status(&id).await?;
    Ok(Json(job.to_response()))
}

/// GET /jobs/:id/result
///
/// Two-part `multipart/mixed` body: vocals, then instrumental.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    let bundle = state.manager.fetch_result(&id).await?;

    let boundary = boundary_for(&id);
    let body = bundle.encode(&boundary);

    tracing::debug!(job_id = %id, bytes = body.len(), "Serving separated stems");

    Ok((
        [(header::CONTENT_TYPE, StemBundle::content_type(&boundary))],
        body,
    )
        .into_response())
}

/// DELETE /jobs/:id
///
/// Always acknowledged, whether or not the job exists.
pub async fn cleanup_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<CleanupResponse> {
    if let Ok(id) = job_id.parse::<JobId>() {
        state.manager.cleanup(&id).await;
    }

    Json(CleanupResponse {
        job_id,
        acknowledged: true,
    })
}

/// POST /jobs/cleanup
///
/// Removes every DONE and FAILED job.
pub async fn cleanup_all_jobs(State(state): State<AppState>) -> Json<CleanupAllResponse> {
    let removed = state.manager.cleanup_all().await;
    Json(CleanupAllResponse { removed })
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/cleanup", post(cleanup_all_jobs))
        .route("/jobs/:id", get(get_job_status).delete(cleanup_job))
        .route("/jobs/:id/result", get(get_job_result))
}
