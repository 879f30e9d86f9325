//! OpenAPI specification for the hue-geofence status API.

use axum::Json;
use geofence_core::{DeviceStatus, HealthResponse, OnlineDevice, PresenceSnapshot};
use utoipa::OpenApi;

use super::error::ErrorResponse;

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Main OpenAPI document structure for hue-geofence.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "hue-geofence API",
        version = "0.1.0",
        description = r#"
# hue-geofence API

hue-geofence turns the lights on when someone comes home and off when everyone has left.

Presence is detected by watching for the household's phones on the local network
(ARP, ICMP and TCP probes, passive capture) and optionally over Bluetooth.

This API is read-only. It reports who the daemon currently considers home.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local hue-geofence daemon")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "presence",
            description = "Tracked devices and the current online set"
        )
    ),
    paths(
        super::health::health_check,
        super::presence::get_presence,
        super::presence::get_device,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            PresenceSnapshot,
            OnlineDevice,
            DeviceStatus,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "hue-geofence API");
        assert!(spec.paths.paths.contains_key("/api/presence/{mac}"));
        assert!(spec.paths.paths.contains_key("/health"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = ApiDoc::openapi().to_pretty_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("getPresence"));
    }
}
