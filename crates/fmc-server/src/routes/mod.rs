//! HTTP routes.

pub mod health;
pub mod queue;

use crate::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;

/// Build the main router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .route("/ws", get(ws_handler))
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new().merge(queue::router())
}
