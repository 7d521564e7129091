//! ussplitter-server library interface for testing
//!
//! Exposes the router, state and job manager so integration tests can drive
//! the HTTP surface with a fake separation engine.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult, JobError};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::JobManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self {
            manager,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// `max_upload_bytes` caps the POST /jobs body.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(api::job_routes())
        .merge(api::model_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
