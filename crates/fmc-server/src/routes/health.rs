//! Health check endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(json!({ "status": "ok", "uptime_seconds": uptime }))
}

/// Ready once every worker role in the readiness checklist has announced
/// itself.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let roles = state
        .broker
        .retained(&state.topics.screen_checklist)
        .ok()
        .flatten()
        .and_then(|msg| serde_json::from_slice::<Map<String, Value>>(&msg.payload).ok())
        .unwrap_or_default();

    let pending: Vec<&String> = roles
        .iter()
        .filter(|(_, ready)| !ready.as_bool().unwrap_or(false))
        .map(|(role, _)| role)
        .collect();

    if roles.is_empty() || !pending.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "waiting", "pending": pending })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}
