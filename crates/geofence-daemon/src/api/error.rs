//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geofence_core::GeofenceError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_mac_address",
    "message": "Invalid MAC address: 'nope'",
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "device_not_tracked").
    #[schema(example = "invalid_mac_address")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid MAC address: 'nope'")]
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (StatusCode::BAD_REQUEST, error_code, message),
            Self::NotFound {
                error_code,
                message,
            } => (StatusCode::NOT_FOUND, error_code, message),
            Self::InternalError {
                error_code,
                message,
            } => {
                tracing::error!(error_code = %error_code, message = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_code, message)
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_code,
                message,
            }),
        )
            .into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from geofence-core errors.
impl From<GeofenceError> for ApiError {
    fn from(err: GeofenceError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        match err {
            GeofenceError::InvalidMacAddress(_) | GeofenceError::InvalidNetworkRange(_) => {
                Self::BadRequest {
                    error_code,
                    message: err.to_string(),
                }
            }
            _ => Self::InternalError {
                error_code,
                message: err.to_string(),
            },
        }
    }
}
