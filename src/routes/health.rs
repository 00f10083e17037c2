// src/routes/health.rs
//! Health check endpoint for the view server.
//!
//! `GET /health` answers as long as the server is running and reports the
//! live stream state alongside, so a UI can show a connection badge without a
//! second request. It never calls the registry.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::stream::ConnectionState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    stream: ConnectionState,
    selected: usize,
}

/// Handle `GET /health`.
async fn health(State(dashboard): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stream: dashboard.stream_state(),
        selected: dashboard.selected().len(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
