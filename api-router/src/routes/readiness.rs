use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 if the database answers, else 503. The queue never
/// blocks readiness; its mode is reported so a degraded process is visible.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let queue = state.queue.mode().as_str();

    match state.db.client.query("RETURN true").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "db": "ok", "queue": queue }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail", "queue": queue },
                "reason": e.to_string()
            })),
        ),
    }
}
