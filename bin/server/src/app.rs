//! HTTP router.

use crate::routes;
use crate::state::AppState;
use crate::ws;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/ws", get(ws::handler))
        .route("/api/events", get(routes::events))
        .route("/api/webhooks/{workspace_id}", post(routes::webhook))
        .route("/api/telegram/{workspace_id}", post(routes::telegram))
        .route("/api/schedules/{workspace_id}", get(routes::schedule))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
