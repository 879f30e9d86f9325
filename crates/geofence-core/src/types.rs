//! Shared types and OpenAPI schemas.
//!
//! Views of presence state handed to the status API. Addresses are rendered
//! as strings so the schemas stay independent of the packet library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::tracker::OnlineRecord;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// A device currently considered home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OnlineDevice {
    /// Wi-Fi MAC address.
    #[schema(example = "aa:bb:cc:dd:ee:01")]
    pub link_address: String,

    /// Last IPv4 address seen for the device, if any.
    #[schema(example = "192.168.1.23")]
    pub network_address: Option<String>,

    /// When the device was last confirmed.
    pub last_seen_utc: DateTime<Utc>,
}

impl From<&OnlineRecord> for OnlineDevice {
    fn from(record: &OnlineRecord) -> Self {
        Self {
            link_address: record.link_address.to_string(),
            network_address: record.network_address.map(|ip| ip.to_string()),
            last_seen_utc: record.last_seen,
        }
    }
}

/// The whole online set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PresenceSnapshot {
    /// Number of tracked devices.
    pub roster_size: usize,

    /// Whether every tracked device is online.
    pub all_online: bool,

    /// Whether passive capture is paused.
    pub listener_paused: bool,

    /// Devices currently online.
    pub online: Vec<OnlineDevice>,
}

/// Status of one tracked device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    /// Wi-Fi MAC address.
    #[schema(example = "aa:bb:cc:dd:ee:01")]
    pub link_address: String,

    /// Whether the device is online.
    pub online: bool,

    /// Whether a Bluetooth address is mapped for the device.
    pub bluetooth_mapped: bool,

    /// Online record, when online.
    pub record: Option<OnlineDevice>,
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pnet::util::MacAddr;

    use super::*;

    #[test]
    fn test_online_device_from_record() {
        let record = OnlineRecord {
            link_address: MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01),
            network_address: Some(Ipv4Addr::new(192, 168, 1, 23)),
            last_seen: Utc::now(),
        };

        let device = OnlineDevice::from(&record);
        assert_eq!(device.link_address, "aa:bb:cc:dd:ee:01");
        assert_eq!(device.network_address.as_deref(), Some("192.168.1.23"));
    }

    #[test]
    fn test_bluetooth_only_device_serializes_null_address() {
        let record = OnlineRecord {
            link_address: MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02),
            network_address: None,
            last_seen: Utc::now(),
        };

        let json = serde_json::to_value(OnlineDevice::from(&record)).unwrap();
        assert!(json["network_address"].is_null());
        assert!(json["last_seen_utc"].is_string());
    }
}
