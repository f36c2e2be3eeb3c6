use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// Liveness: the process is up and serving requests
#[tracing::instrument]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness: the initial reconcile has completed and shutdown has not begun
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.lifecycle.is_ready() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "triggers": state.store.get_all().len(),
                "live_jobs": state.scheduler().job_count(),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down" })),
        )
    }
}
