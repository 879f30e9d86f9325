//! Presence API endpoints.
//!
//! Read-only views of the tracker's online set.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use geofence_core::{parse_mac, DeviceStatus, PresenceSnapshot};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the presence router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_presence))
        .route("/{mac}", get(get_device))
}

/// Everyone currently home.
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "presence",
    operation_id = "getPresence",
    summary = "List devices currently online",
    description = "Returns the size of the tracked roster, whether every tracked \
        device is online, whether passive capture is paused, and the online records.",
    responses(
        (status = 200, description = "Current online set", body = PresenceSnapshot)
    )
)]
pub async fn get_presence(State(state): State<SharedState>) -> Json<PresenceSnapshot> {
    Json(state.presence().snapshot())
}

/// One tracked device.
#[utoipa::path(
    get,
    path = "/api/presence/{mac}",
    tag = "presence",
    operation_id = "getDevice",
    summary = "Get the status of one tracked device",
    params(
        ("mac" = String, Path, description = "Wi-Fi MAC address, e.g. AA:BB:CC:DD:EE:01")
    ),
    responses(
        (status = 200, description = "Device status", body = DeviceStatus),
        (status = 400, description = "Malformed MAC address", body = crate::api::error::ErrorResponse),
        (status = 404, description = "Device is not tracked", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<SharedState>,
    Path(mac): Path<String>,
) -> ApiResult<Json<DeviceStatus>> {
    let address = parse_mac(&mac)?;
    state
        .presence()
        .device(&address)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            error_code: "device_not_tracked".to_string(),
            message: format!("Device {address} is not in the tracked roster"),
        })
}
