//! Local view server routes.
//!
//! Gateway for the sibling route modules: each one exports a subrouter over
//! the shared [`AppState`] and this module merges them, so `main.rs` never
//! needs to know about individual endpoints.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, warn};

use crate::gateway::MutationError;
use crate::registry::RegistryError;
use crate::Dashboard;

mod devices;
mod health;
mod session;
mod view;

// ---

pub type AppState = Arc<Dashboard>;

pub fn router(dashboard: AppState) -> Router {
    // ---
    Router::new()
        .merge(devices::router())
        .merge(view::router())
        .merge(session::router())
        .merge(health::router())
        .with_state(dashboard)
}

/// JSON error body shared by every route.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Registry refusals keep the registry's status and message; anything else
/// is a bad gateway from the UI's point of view.
fn registry_error_response(e: &RegistryError) -> Response {
    // ---
    match e {
        RegistryError::Rejected { status, message } => error_response(
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            message.clone(),
        ),
        RegistryError::InvalidUrl(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        RegistryError::Transport(_) | RegistryError::Decode(_) => {
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

fn mutation_error_response(e: &MutationError) -> Response {
    // ---
    if e.is_local() {
        debug!("Mutation refused before reaching the registry: {}", e);
    } else {
        warn!("Mutation failed at the registry: {}", e);
    }
    match e {
        MutationError::Validation(v) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, v.to_string())
        }
        MutationError::NotSignedIn => error_response(StatusCode::UNAUTHORIZED, e.to_string()),
        MutationError::Registry(r) => registry_error_response(r),
    }
}
