use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use super::{mutation_error_response, registry_error_response, AppState};
use crate::gateway::MutationStatus;
use crate::models::{Device, DevicePatch, NewDevice};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/devices", get(list_devices).post(add_device))
        .route("/devices/refresh", post(refresh_devices))
        .route(
            "/devices/{dev_eui}",
            patch(update_device).delete(delete_device),
        )
}

/// A listed device with the outcome of its last mutation, if any.
#[derive(Serialize)]
struct DeviceEntry {
    #[serde(flatten)]
    device: Device,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mutation: Option<MutationStatus>,
}

async fn list_devices(State(dashboard): State<AppState>) -> Json<Vec<DeviceEntry>> {
    // ---
    let entries = dashboard
        .devices()
        .into_iter()
        .map(|device| DeviceEntry {
            display_name: device.display_name().to_string(),
            mutation: dashboard.device_status(&device.dev_eui),
            device,
        })
        .collect();
    Json(entries)
}

async fn refresh_devices(State(dashboard): State<AppState>) -> Response {
    // ---
    info!("POST /devices/refresh");
    match dashboard.refresh_devices().await {
        Ok(_) => (StatusCode::OK, Json(dashboard.devices())).into_response(),
        Err(e) => {
            error!("Device refresh failed: {}", e);
            registry_error_response(&e)
        }
    }
}

async fn add_device(State(dashboard): State<AppState>, Json(payload): Json<NewDevice>) -> Response {
    // ---
    info!("POST /devices - {}", payload.dev_eui);
    match dashboard.add_device(&payload).await {
        Ok(device) => (StatusCode::CREATED, Json(device)).into_response(),
        Err(e) => mutation_error_response(&e),
    }
}

async fn update_device(
    State(dashboard): State<AppState>,
    Path(dev_eui): Path<String>,
    Json(patch): Json<DevicePatch>,
) -> Response {
    // ---
    info!("PATCH /devices/{}", dev_eui);
    match dashboard.update_device(&dev_eui, &patch).await {
        Ok(device) => (StatusCode::OK, Json(device)).into_response(),
        Err(e) => mutation_error_response(&e),
    }
}

async fn delete_device(State(dashboard): State<AppState>, Path(dev_eui): Path<String>) -> Response {
    // ---
    info!("DELETE /devices/{}", dev_eui);
    match dashboard.delete_device(&dev_eui).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => mutation_error_response(&e),
    }
}
