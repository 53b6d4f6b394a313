use axum::{response::IntoResponse, Extension, Json};

use crate::trustgate::AppState;

// axum handler for the metrics snapshot
pub async fn metrics(state: Extension<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.metrics().snapshot())
}
