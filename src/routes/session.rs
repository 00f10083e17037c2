use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{registry_error_response, AppState};
use crate::registry::Identity;
use crate::session::Session;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/session", get(current).post(login).delete(logout))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    id_token: String,
}

/// Session as shown to the UI. The bearer token stays server-side.
#[derive(Serialize)]
struct SessionView {
    authenticated: bool,
    is_admin: bool,
    identity: Option<Identity>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            authenticated: session.is_authenticated(),
            is_admin: session.is_admin,
            identity: session.identity,
        }
    }
}

async fn current(State(dashboard): State<AppState>) -> Json<SessionView> {
    Json(dashboard.session().into())
}

async fn login(State(dashboard): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    // ---
    info!("POST /session");
    match dashboard.login(&req.id_token).await {
        Ok(session) => (StatusCode::OK, Json(SessionView::from(session))).into_response(),
        Err(e) => {
            error!("Sign-in failed: {}", e);
            registry_error_response(&e)
        }
    }
}

async fn logout(State(dashboard): State<AppState>) -> StatusCode {
    // ---
    info!("DELETE /session");
    dashboard.logout();
    StatusCode::NO_CONTENT
}
