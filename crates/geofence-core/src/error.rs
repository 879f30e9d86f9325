//! Unified error types for the geofence core library.
//!
//! This module provides a unified error type [`GeofenceError`] that covers the
//! failure modes of the presence engine. Modules keep their own specific error
//! types ([`ConfigError`](crate::config::ConfigError),
//! [`CaptureError`](crate::listener::CaptureError)) for internal use.
//!
//! # Design Principles
//!
//! - **Fatal only at startup**: configuration errors abort construction, every
//!   runtime fault is logged and absorbed by the component that hit it
//! - **Actionable messages**: error messages guide users toward resolution
//! - **Context preservation**: wrapped errors maintain their original context
//!
//! # Example
//!
//! ```rust
//! use geofence_core::error::{GeofenceError, Result};
//!
//! fn require_devices(devices: &[String]) -> Result<()> {
//!     if devices.is_empty() {
//!         return Err(GeofenceError::EmptyRoster);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all geofence operations.
#[derive(Debug, Error)]
pub enum GeofenceError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration sources could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// No devices are configured for tracking.
    #[error("No tracked devices configured. Set `devices` (or GEOFENCE_DEVICES) to at least one MAC address.")]
    EmptyRoster,

    /// A configured address is not a valid 6-octet MAC address.
    #[error("Invalid MAC address: '{0}'. Expected six colon-separated hex octets (e.g., 'AA:BB:CC:DD:EE:FF').")]
    InvalidMacAddress(String),

    /// The configured network range is not a valid IPv4 CIDR block.
    #[error("Invalid network range: '{0}'. Expected IPv4 CIDR notation (e.g., '192.168.1.0/24').")]
    InvalidNetworkRange(String),

    // =========================================================================
    // CAPTURE ERRORS
    // =========================================================================
    /// No usable network interface was found for capture or link-layer probing.
    #[error("Network interface not found: {0}")]
    InterfaceNotFound(String),

    /// The capture engine failed; the listener restarts the session.
    #[error("Packet capture failed: {0}")]
    CaptureFailed(String),

    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// Bluetooth probing is unavailable on this system or build.
    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for geofence operations.
pub type Result<T> = std::result::Result<T, GeofenceError>;

/// Short alias for [`GeofenceError`].
pub type Error = GeofenceError;

impl GeofenceError {
    /// Returns `true` if this error is related to configuration.
    ///
    /// Configuration errors are the only errors allowed to abort startup.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
                | Self::EmptyRoster
                | Self::InvalidMacAddress(_)
                | Self::InvalidNetworkRange(_)
        )
    }

    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(self, Self::BluetoothUnavailable(_))
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::CaptureFailed(_) | Self::IoError(_))
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::EmptyRoster => "EMPTY_ROSTER",
            Self::InvalidMacAddress(_) => "INVALID_MAC_ADDRESS",
            Self::InvalidNetworkRange(_) => "INVALID_NETWORK_RANGE",
            Self::InterfaceNotFound(_) => "INTERFACE_NOT_FOUND",
            Self::CaptureFailed(_) => "CAPTURE_FAILED",
            Self::BluetoothUnavailable(_) => "BLUETOOTH_UNAVAILABLE",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for GeofenceError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::listener::CaptureError> for GeofenceError {
    fn from(err: crate::listener::CaptureError) -> Self {
        use crate::listener::CaptureError;
        match err {
            CaptureError::InterfaceNotFound { name } => Self::InterfaceNotFound(name),
            CaptureError::UnsupportedChannel { interface } => Self::CaptureFailed(format!(
                "interface {interface} does not provide an ethernet channel"
            )),
            CaptureError::Open { interface, source } => {
                Self::CaptureFailed(format!("failed to open {interface}: {source}"))
            }
            CaptureError::Read(source) => Self::CaptureFailed(source.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_config_error_classification() {
        assert!(GeofenceError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(GeofenceError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(GeofenceError::EmptyRoster.is_config_error());
        assert!(GeofenceError::InvalidMacAddress("nope".into()).is_config_error());
        assert!(GeofenceError::InvalidNetworkRange("10.0.0.0/33".into()).is_config_error());

        assert!(!GeofenceError::CaptureFailed("boom".into()).is_config_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(GeofenceError::CaptureFailed("timeout".into()).is_recoverable());
        assert!(GeofenceError::IoError(IoErr::new(ErrorKind::Other, "x")).is_recoverable());
        assert!(!GeofenceError::EmptyRoster.is_recoverable());
        assert!(!GeofenceError::BluetoothUnavailable("off".into()).is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GeofenceError::EmptyRoster.error_code(), "EMPTY_ROSTER");
        assert_eq!(
            GeofenceError::InvalidMacAddress(String::new()).error_code(),
            "INVALID_MAC_ADDRESS"
        );
        assert!(GeofenceError::BluetoothUnavailable("x".into()).is_bluetooth_error());
    }

    #[test]
    fn test_from_config_error() {
        use crate::config::ConfigError;

        let err: GeofenceError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "devices".into(),
                message: "must not be empty".into(),
            },
            ConfigError::ValidationError {
                field: "network.range".into(),
                message: "bad cidr".into(),
            },
        ])
        .into();

        assert!(err.is_config_error());
        let text = err.to_string();
        assert!(text.contains("devices: must not be empty"));
        assert!(text.contains("network.range: bad cidr"));
    }

    #[test]
    fn test_from_capture_error() {
        use crate::listener::CaptureError;

        let err: GeofenceError = CaptureError::InterfaceNotFound {
            name: "wlan7".into(),
        }
        .into();
        assert!(matches!(err, GeofenceError::InterfaceNotFound(ref n) if n == "wlan7"));
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "INTERFACE_NOT_FOUND");

        let err: GeofenceError =
            CaptureError::Read(IoErr::from(ErrorKind::ConnectionReset)).into();
        assert!(err.is_recoverable());
        assert_eq!(err.error_code(), "CAPTURE_FAILED");

        let err: GeofenceError = CaptureError::Open {
            interface: "eth0".into(),
            source: IoErr::from(ErrorKind::PermissionDenied),
        }
        .into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("eth0"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<GeofenceError>();
        assert_sync::<GeofenceError>();
    }
}
