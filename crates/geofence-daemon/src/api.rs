//! HTTP API routes and handlers.
//!
//! The status API is read-only:
//! - `health` - Service health checks
//! - `presence` - The online set and per-device status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod presence;

pub use error::{ApiError, ApiResult, ErrorResponse};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /presence          - Online set
/// ├── /presence/{mac}    - One tracked device
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/presence", presence::router()),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use geofence_core::{DeviceStatus, HealthResponse, MacAddr, PresenceSnapshot, PresenceView};

    use super::*;
    use crate::state::AppState;

    struct Empty;

    impl PresenceView for Empty {
        fn snapshot(&self) -> PresenceSnapshot {
            PresenceSnapshot {
                roster_size: 1,
                all_online: false,
                listener_paused: false,
                online: Vec::new(),
            }
        }

        fn device(&self, _: &MacAddr) -> Option<DeviceStatus> {
            None
        }
    }

    fn server() -> TestServer {
        TestServer::new(create_router(AppState::new(Arc::new(Empty)))).unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let response = server().get("/health").await;
        response.assert_status_ok();
        let health: HealthResponse = response.json();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_openapi_route() {
        let response = server().get("/api/openapi.json").await;
        response.assert_status_ok();
        let spec: serde_json::Value = response.json();
        assert_eq!(spec["info"]["title"], "hue-geofence API");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        server().get("/api/unknown").await.assert_status_not_found();
    }
}
