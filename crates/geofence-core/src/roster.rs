//! Tracked device roster.
//!
//! The roster is the fixed set of devices whose presence is tracked. Each device
//! is identified by its Wi-Fi MAC address and may carry a Bluetooth address used
//! by the wireless probe. The roster is built once from validated configuration
//! and never changes for the lifetime of the process.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use pnet::util::MacAddr;
use regex::Regex;

use crate::error::{GeofenceError, Result};

static MAC_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC pattern is a valid regex")
});

/// Returns `true` if `address` is six colon-separated hex octets.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_PATTERN.is_match(address.trim())
}

/// Parses a colon-separated MAC address, case-insensitively.
///
/// # Errors
///
/// Returns [`GeofenceError::InvalidMacAddress`] if the address is not six
/// colon-separated hex octets.
pub fn parse_mac(address: &str) -> Result<MacAddr> {
    let trimmed = address.trim();
    if !is_valid_mac_address(trimmed) {
        return Err(GeofenceError::InvalidMacAddress(address.to_string()));
    }
    trimmed
        .parse::<MacAddr>()
        .map_err(|_| GeofenceError::InvalidMacAddress(address.to_string()))
}

/// A device whose presence is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackedDevice {
    /// Wi-Fi (link-layer) address, the primary identity.
    pub link_address: MacAddr,

    /// Bluetooth address used for the wireless probe, if mapped.
    pub wireless_address: Option<MacAddr>,
}

/// The fixed set of tracked devices.
#[derive(Debug, Clone)]
pub struct Roster {
    devices: Vec<TrackedDevice>,
    index: HashSet<MacAddr>,
}

impl Roster {
    /// Builds a roster from link addresses and a wireless mapping keyed by link address.
    ///
    /// Duplicate link addresses are collapsed.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::EmptyRoster`] if no devices are given, or
    /// [`GeofenceError::ConfigValidationError`] if the wireless map names a
    /// device outside the roster.
    pub fn new(links: &[MacAddr], wireless: &HashMap<MacAddr, MacAddr>) -> Result<Self> {
        if links.is_empty() {
            return Err(GeofenceError::EmptyRoster);
        }

        let mut index = HashSet::with_capacity(links.len());
        let mut devices = Vec::with_capacity(links.len());
        for &link in links {
            if index.insert(link) {
                devices.push(TrackedDevice {
                    link_address: link,
                    wireless_address: wireless.get(&link).copied(),
                });
            }
        }

        if let Some(stray) = wireless.keys().find(|mac| !index.contains(mac)) {
            return Err(GeofenceError::ConfigValidationError(format!(
                "bluetooth_devices: {stray} is not a tracked device"
            )));
        }

        Ok(Self { devices, index })
    }

    /// Parses a roster from textual addresses.
    ///
    /// # Errors
    ///
    /// Returns an error for any malformed address or an empty list.
    pub fn parse<S: AsRef<str>>(links: &[S], wireless: &HashMap<String, String>) -> Result<Self> {
        let links = links
            .iter()
            .map(|s| parse_mac(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let wireless = wireless
            .iter()
            .map(|(wifi, bt)| Ok((parse_mac(wifi)?, parse_mac(bt)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Self::new(&links, &wireless)
    }

    /// Number of tracked devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Always `false`; a roster cannot be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether `link` belongs to a tracked device.
    #[must_use]
    pub fn contains(&self, link: &MacAddr) -> bool {
        self.index.contains(link)
    }

    /// Bluetooth address mapped to `link`, if any.
    #[must_use]
    pub fn wireless_address(&self, link: &MacAddr) -> Option<MacAddr> {
        self.devices
            .iter()
            .find(|d| d.link_address == *link)
            .and_then(|d| d.wireless_address)
    }

    /// Iterates over the tracked devices.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedDevice> {
        self.devices.iter()
    }

    /// Link addresses of every tracked device.
    pub fn link_addresses(&self) -> impl Iterator<Item = MacAddr> + '_ {
        self.devices.iter().map(|d| d.link_address)
    }
}
