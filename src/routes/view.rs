//! Presentation state: selection, chart rows, raw series, stream status,
//! latest registry reading and CSV export.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, error, info};

use super::{error_response, registry_error_response, AppState};
use crate::history::BackfillOutcome;
use crate::models::LatestSample;
use crate::stream::ConnectionState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/selection", get(selection))
        .route(
            "/selection/{dev_eui}",
            post(select).put(select_only).delete(deselect),
        )
        .route("/chart", get(chart))
        .route("/series/{dev_eui}", get(series))
        .route("/stream", get(stream_status))
        .route("/latest/{dev_eui}", get(latest_reading))
        .route("/export/{dev_eui}", get(export_csv))
}

#[derive(Serialize)]
struct BackfillReport {
    dev_eui: String,
    backfill: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    readings: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl BackfillReport {
    fn new(dev_eui: String, outcome: BackfillOutcome) -> Self {
        // ---
        let (backfill, readings, error) = match outcome {
            BackfillOutcome::Applied { readings } => ("applied", Some(readings), None),
            BackfillOutcome::NoData => ("no_data", None, None),
            BackfillOutcome::Discarded => ("discarded", None, None),
            BackfillOutcome::Failed(e) => ("failed", None, Some(e.to_string())),
        };
        Self {
            dev_eui,
            backfill,
            readings,
            error,
        }
    }
}

#[derive(Serialize)]
struct StreamStatus {
    state: ConnectionState,
    latest: Option<LatestSample>,
}

async fn selection(State(dashboard): State<AppState>) -> Json<Vec<String>> {
    Json(dashboard.selected())
}

/// Select a device and wait for its backfill. A failed backfill still leaves
/// the device selected, so the response is 200 with the outcome in the body.
async fn select(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    // ---
    info!("POST /selection/{}", dev_eui);
    match dashboard.select(&dev_eui).await {
        Ok(outcome) => (StatusCode::OK, Json(BackfillReport::new(dev_eui, outcome))).into_response(),
        Err(e) => {
            error!("Backfill task for {} failed: {}", dev_eui, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "backfill task failed")
        }
    }
}

/// Make `dev_eui` the only selected device, then wait for its backfill.
async fn select_only(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    // ---
    info!("PUT /selection/{}", dev_eui);
    match dashboard.select_only(&dev_eui).await {
        Ok(outcome) => (StatusCode::OK, Json(BackfillReport::new(dev_eui, outcome))).into_response(),
        Err(e) => {
            error!("Backfill task for {} failed: {}", dev_eui, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "backfill task failed")
        }
    }
}

async fn deselect(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    // ---
    info!("DELETE /selection/{}", dev_eui);
    if dashboard.deselect(&dev_eui) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("{dev_eui} is not selected"))
    }
}

async fn chart(State(dashboard): State<AppState>) -> Response {
    // ---
    let rows = dashboard.chart();
    debug!("GET /chart - {} rows", rows.len());
    Json(rows).into_response()
}

async fn series(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    Json(dashboard.series(&dev_eui)).into_response()
}

async fn stream_status(State(dashboard): State<AppState>) -> Json<StreamStatus> {
    // ---
    let latest = dashboard.subscribe_latest().borrow().clone();
    Json(StreamStatus {
        state: dashboard.stream_state(),
        latest,
    })
}

async fn latest_reading(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    // ---
    match dashboard.latest_reading(&dev_eui).await {
        Ok(Some(reading)) => Json(reading).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no readings for {dev_eui}")),
        Err(e) => {
            error!("Latest reading for {} failed: {}", dev_eui, e);
            registry_error_response(&e)
        }
    }
}

async fn export_csv(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    // ---
    info!("GET /export/{}", dev_eui);
    match dashboard.export_csv(&dev_eui).await {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{dev_eui}.csv\""),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => {
            error!("Export for {} failed: {}", dev_eui, e);
            registry_error_response(&e)
        }
    }
}
