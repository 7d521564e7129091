//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("ussplitter-server")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub git_hash: String,
    /// Separation engine in use
    pub engine: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub queued: usize,
    /// Job currently being separated, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let stats = state.manager.stats().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "ussplitter-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        engine: state.manager.engine().name().to_string(),
        uptime_seconds,
        queued: stats.queued,
        processing: stats.processing.map(|id| id.to_string()),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
