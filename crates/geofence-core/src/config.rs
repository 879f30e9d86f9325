//! Application configuration management.
//!
//! Handles loading and validating hue-geofence configuration including:
//! - The roster of tracked Wi-Fi MAC addresses and their Bluetooth aliases
//! - The network range to scan
//! - Periodic task intervals
//! - Probe retry policy and passive listener timing
//! - Hue bridge, location and status server settings used by the daemon
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `GEOFENCE_`-prefixed environment variables (`__` separates sections, so
//! `GEOFENCE_NETWORK__RANGE` sets `network.range`). It is read once at startup
//! and converted into typed values before any component is built.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{GeofenceError, Result};
use crate::probe::RetryPolicy;
use crate::roster::{is_valid_mac_address, Roster};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "GEOFENCE_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GEOFENCE";

/// Shortest accepted prefix for `network.range`; every address in it is stimulated on each scan.
pub const MIN_RANGE_PREFIX: u8 = 16;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wi-Fi MAC addresses of the tracked devices.
    pub devices: Vec<String>,

    /// Bluetooth address for each tracked device that has one, keyed by Wi-Fi MAC.
    pub bluetooth_devices: HashMap<String, String>,

    /// Network scanning settings.
    pub network: NetworkConfig,

    /// Periodic task intervals.
    pub schedule: ScheduleConfig,

    /// Probe retry policy.
    pub probe: ProbeConfig,

    /// Passive listener timing.
    pub listener: ListenerConfig,

    /// Hue bridge settings.
    pub lights: LightsConfig,

    /// Location used for sunset lookups.
    pub location: Option<Location>,

    /// Status API settings.
    pub server: ServerConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// IPv4 range (CIDR) swept by the active scan.
    pub range: String,

    /// Interface to capture and probe on; picked automatically when unset.
    pub interface: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            range: "192.168.1.0/24".to_string(),
            interface: None,
        }
    }
}

/// Periodic task intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between active scans of the network range.
    pub scan_interval_secs: u64,

    /// Seconds between liveness sweeps of online devices.
    pub liveness_interval_secs: u64,

    /// Seconds between Bluetooth sweeps of the whole roster.
    pub wireless_interval_secs: u64,

    /// Scheduler tick in milliseconds.
    pub tick_millis: u64,

    /// Active scans run before periodic tasks start.
    pub initial_scan_rounds: u32,

    /// Milliseconds to wait after each startup scan round for replies to be captured.
    pub initial_scan_settle_millis: u64,

    /// Whether the periodic active scan runs at all.
    pub active_scan_enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 3600,
            liveness_interval_secs: 300,
            wireless_interval_secs: 600,
            tick_millis: 1000,
            initial_scan_rounds: 3,
            initial_scan_settle_millis: 2000,
            active_scan_enabled: true,
        }
    }
}

impl ScheduleConfig {
    /// Interval of the active scan task.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Interval of the liveness sweep task.
    #[must_use]
    pub const fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    /// Interval of the wireless sweep task.
    #[must_use]
    pub const fn wireless_interval(&self) -> Duration {
        Duration::from_secs(self.wireless_interval_secs)
    }

    /// Scheduler tick.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    /// Wait after each startup scan round.
    #[must_use]
    pub const fn initial_scan_settle(&self) -> Duration {
        Duration::from_millis(self.initial_scan_settle_millis)
    }
}

/// Probe retry policy. Every probe is bounded by attempts times timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// ARP request attempts.
    pub arp_attempts: u32,
    /// Time to wait for an ARP reply, per attempt.
    pub arp_timeout_millis: u64,
    /// ICMP echo attempts.
    pub icmp_attempts: u32,
    /// Time to wait for an echo reply, per attempt.
    pub icmp_timeout_millis: u64,
    /// TCP connect attempts (per port).
    pub tcp_attempts: u32,
    /// Time to wait for a TCP answer, per attempt.
    pub tcp_timeout_millis: u64,
    /// Ports probed when a device ignores ARP and ICMP.
    pub tcp_ports: Vec<u16>,
    /// Bluetooth echo attempts.
    pub wireless_attempts: u32,
    /// Time to wait for a Bluetooth answer, per attempt.
    pub wireless_timeout_millis: u64,
    /// Pause between failed attempts.
    pub backoff_millis: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            arp_attempts: 5,
            arp_timeout_millis: 2000,
            icmp_attempts: 5,
            icmp_timeout_millis: 2000,
            tcp_attempts: 3,
            tcp_timeout_millis: 1000,
            // iOS wifi-sync and Bonjour
            tcp_ports: vec![62078, 5353],
            wireless_attempts: 5,
            wireless_timeout_millis: 10_000,
            backoff_millis: 200,
        }
    }
}

impl ProbeConfig {
    const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }

    /// Retry policy for the link-layer probe.
    #[must_use]
    pub const fn arp_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.arp_attempts,
            Duration::from_millis(self.arp_timeout_millis),
            self.backoff(),
        )
    }

    /// Retry policy for the network-layer probe.
    #[must_use]
    pub const fn icmp_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.icmp_attempts,
            Duration::from_millis(self.icmp_timeout_millis),
            self.backoff(),
        )
    }

    /// Retry policy for the transport-layer probe.
    #[must_use]
    pub const fn tcp_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.tcp_attempts,
            Duration::from_millis(self.tcp_timeout_millis),
            self.backoff(),
        )
    }

    /// Retry policy for the Bluetooth probe.
    #[must_use]
    pub const fn wireless_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.wireless_attempts,
            Duration::from_millis(self.wireless_timeout_millis),
            self.backoff(),
        )
    }
}

/// Passive listener timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Upper bound on a single capture read.
    pub read_timeout_millis: u64,
    /// Delay before reopening a failed capture session.
    pub restart_delay_millis: u64,
    /// How often a paused listener checks whether it should resume.
    pub pause_poll_millis: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_timeout_millis: 1000,
            restart_delay_millis: 5000,
            pause_poll_millis: 1000,
        }
    }
}

impl ListenerConfig {
    /// Capture read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_millis)
    }

    /// Delay before reopening a failed capture.
    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_millis)
    }

    /// Poll interval while paused.
    #[must_use]
    pub const fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_millis)
    }
}

/// Hue bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightsConfig {
    /// Bridge address (IP or host name).
    pub bridge_ip: Option<String>,

    /// Whitelisted bridge API user.
    #[serde(skip_serializing)]
    pub username: Option<String>,

    /// Light ids switched on at arrival.
    pub arrive_lights: Vec<String>,

    /// Scene activated at arrival after sunset.
    pub after_sunset_scene: Option<String>,

    /// Brightness used for arrive lights (1-254).
    pub brightness: u8,
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self {
            bridge_ip: None,
            username: None,
            arrive_lights: Vec::new(),
            after_sunset_scene: None,
            brightness: 254,
        }
    }
}

/// Geographic location for sunset lookups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Status API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether the status API is served.
    pub enabled: bool,
    /// Socket address to bind.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Use JSON file logging instead of pretty stdout.
    pub production: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            production: false,
        }
    }
}

impl Config {
    /// Load configuration from the default sources.
    ///
    /// Uses the file named by `GEOFENCE_CONFIG` if set (it must exist),
    /// otherwise the platform default path if present, then applies
    /// environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Some(Path::new(&path))),
            None => Self::load_from(None),
        }
    }

    /// Load configuration from an explicit file (or the default path when `None`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if an explicit path does not exist,
    /// or a parse/validation error.
    pub fn load_from(path: Option<&Path>) -> ConfigResult<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Some(config::File::from(path).required(true))
            }
            None => default_config_path().map(|p| config::File::from(p).required(false)),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let merged = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("devices")
                    .with_list_parse_key("lights.arrive_lights")
                    .with_list_parse_key("probe.tcp_ports"),
            )
            .build()?;

        let config: Self = merged.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single problem found, or
    /// [`ConfigError::MultipleValidationErrors`] when there are several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if self.devices.is_empty() {
            fail("devices", "at least one device MAC address is required".into());
        }
        for device in &self.devices {
            if !is_valid_mac_address(device) {
                fail("devices", format!("'{device}' is not a valid MAC address"));
            }
        }
        for (wifi, bt) in &self.bluetooth_devices {
            if !is_valid_mac_address(wifi) {
                fail(
                    "bluetooth_devices",
                    format!("key '{wifi}' is not a valid MAC address"),
                );
            } else if !self
                .devices
                .iter()
                .any(|d| d.trim().eq_ignore_ascii_case(wifi.trim()))
            {
                fail(
                    "bluetooth_devices",
                    format!("'{wifi}' is not listed in devices"),
                );
            }
            if !is_valid_mac_address(bt) {
                fail(
                    "bluetooth_devices",
                    format!("'{bt}' is not a valid Bluetooth address"),
                );
            }
        }

        match self.network.range.parse::<Ipv4Network>() {
            Ok(range) if range.prefix() < MIN_RANGE_PREFIX => fail(
                "network.range",
                format!(
                    "'{}' is too large to scan, use a /{MIN_RANGE_PREFIX} or smaller block",
                    self.network.range
                ),
            ),
            Ok(_) => {}
            Err(_) => fail(
                "network.range",
                format!("'{}' is not an IPv4 CIDR block", self.network.range),
            ),
        }

        let schedule = &self.schedule;
        for (field, value) in [
            ("schedule.scan_interval_secs", schedule.scan_interval_secs),
            ("schedule.liveness_interval_secs", schedule.liveness_interval_secs),
            ("schedule.wireless_interval_secs", schedule.wireless_interval_secs),
            ("schedule.tick_millis", schedule.tick_millis),
        ] {
            if value == 0 {
                fail(field, "must be greater than zero".into());
            }
        }

        let probe = &self.probe;
        for (field, value) in [
            ("probe.arp_attempts", probe.arp_attempts),
            ("probe.icmp_attempts", probe.icmp_attempts),
            ("probe.tcp_attempts", probe.tcp_attempts),
            ("probe.wireless_attempts", probe.wireless_attempts),
        ] {
            if value == 0 {
                fail(field, "must be at least 1".into());
            }
        }
        for (field, value) in [
            ("probe.arp_timeout_millis", probe.arp_timeout_millis),
            ("probe.icmp_timeout_millis", probe.icmp_timeout_millis),
            ("probe.tcp_timeout_millis", probe.tcp_timeout_millis),
            ("probe.wireless_timeout_millis", probe.wireless_timeout_millis),
            ("listener.read_timeout_millis", self.listener.read_timeout_millis),
        ] {
            if value == 0 {
                fail(field, "must be greater than zero".into());
            }
        }

        if self.lights.brightness == 0 || self.lights.brightness > 254 {
            fail("lights.brightness", "must be between 1 and 254".into());
        }

        if let Some(location) = self.location {
            if !(-90.0..=90.0).contains(&location.latitude) {
                fail("location.latitude", "must be between -90 and 90".into());
            }
            if !(-180.0..=180.0).contains(&location.longitude) {
                fail("location.longitude", "must be between -180 and 180".into());
            }
        }

        if self.server.enabled && self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            fail(
                "server.bind",
                format!("'{}' is not a socket address", self.server.bind),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Build the typed roster.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty roster or malformed address.
    pub fn roster(&self) -> Result<Roster> {
        Roster::parse(&self.devices, &self.bluetooth_devices)
    }

    /// Parse the active scan range.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::InvalidNetworkRange`] for malformed CIDR.
    pub fn network_range(&self) -> Result<Ipv4Network> {
        self.network
            .range
            .parse()
            .map_err(|_| GeofenceError::InvalidNetworkRange(self.network.range.clone()))
    }
}

/// Platform default configuration file path.
///
/// On Linux: `/etc/hue-geofence/config.toml`
/// Elsewhere: the per-user config directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/etc/hue-geofence/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "hue-geofence")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
