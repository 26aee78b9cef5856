//! Queue and run-status inspection endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use fmc_core::{RunStatus, StatusToken};
use serde::Serialize;
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue", get(get_queue))
        .route("/status", get(get_status))
}

/// The last published queue snapshot, in its wire format. `null` when no run
/// is loaded.
async fn get_queue(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let Some(snapshot) = state.broker.retained(&state.topics.queue_snapshot)? else {
        return Ok(Json(Value::Null));
    };
    let value = serde_json::from_slice(&snapshot.payload)
        .map_err(|e| ApiError::Internal(format!("corrupt queue snapshot: {}", e)))?;
    Ok(Json(value))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    /// Raw retained payload.
    status: Option<String>,
    token: Option<String>,
    origin: Option<String>,
    comment: Option<String>,
    running: bool,
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let raw = state
        .broker
        .retained(&state.topics.run_status)?
        .map(|msg| msg.payload_str().into_owned());
    let parsed = raw.as_deref().and_then(|s| s.parse::<RunStatus>().ok());

    Ok(Json(StatusResponse {
        running: matches!(
            parsed.as_ref().map(|s| s.token),
            Some(StatusToken::Running(_))
        ),
        token: parsed.as_ref().map(|s| s.token.to_string()),
        origin: parsed.as_ref().and_then(|s| s.origin.clone()),
        comment: parsed.and_then(|s| s.comment),
        status: raw,
    }))
}
