//! GET /models: separation models the server accepts

use axum::{extract::State, routing::get, Json, Router};
use ussplitter_common::api::ModelsResponse;

use crate::AppState;

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let engine = state.manager.engine();
    Json(ModelsResponse {
        default_model: engine.default_model().to_string(),
        models: engine.models(),
    })
}

pub fn model_routes() -> Router<AppState> {
    Router::new().route("/models", get(list_models))
}
