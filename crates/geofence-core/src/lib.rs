//! # geofence-core
//!
//! Presence tracking engine for hue-geofence.
//!
//! This crate decides whether anyone is home by watching for a fixed roster of
//! phones on the local network, and turns that into two transitions: a device
//! arrived, or everyone left.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`roster`] - Tracked devices and MAC address parsing
//! - [`probe`] - Bounded ARP, ICMP, TCP and Bluetooth liveness probes
//! - [`listener`] - Passive capture of traffic from tracked devices
//! - [`tracker`] - The online set and its reconciliation
//! - [`scheduler`] - Periodic tasks with single-flight protection
//! - [`dispatch`] - Delivery of transitions to the light controller
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas
//!
//! Evidence flows from the listener and the scheduled sweeps into the
//! [`PresenceTracker`], which emits [`PresenceEvent`]s consumed by the
//! [`EventDispatcher`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flight;
pub mod listener;
pub mod probe;
pub mod roster;
pub mod scheduler;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
pub use self::config::{
    default_config_path, Config, ConfigError, ConfigResult, ListenerConfig, LightsConfig,
    Location, LoggingConfig, NetworkConfig, ProbeConfig, ScheduleConfig, ServerConfig,
};
pub use dispatch::{
    EventDispatcher, EventReceiver, EventSender, LightController, PresenceEvent, SunsetProvider,
};
pub use error::{Error, GeofenceError, Result};
pub use flight::{FlightGuard, SingleFlight};
pub use listener::{
    CaptureError, CaptureFilter, CaptureSource, InterfaceSource, ListenerControl, Observation,
    ObservationSink, PassiveListener,
};
pub use probe::{find_interface, InterfaceInfo, NetworkProber, Prober, RetryPolicy};
pub use roster::{is_valid_mac_address, parse_mac, Roster, TrackedDevice};
pub use scheduler::Scheduler;
pub use tracker::{OnlineRecord, PresenceTracker, PresenceView, ScanOutcome, SweepOutcome};
pub use types::{DeviceStatus, HealthResponse, OnlineDevice, PresenceSnapshot};

/// Re-exported so callers can name link-layer addresses without depending on pnet.
pub use pnet::util::MacAddr;
