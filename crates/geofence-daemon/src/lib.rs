//! # geofence-daemon
//!
//! Runtime for hue-geofence: turns presence transitions from
//! [`geofence_core`] into Philips Hue light changes.
//!
//! - [`app`] - Bootstrap and task wiring
//! - [`hue`] - Hue bridge light controller
//! - [`sun`] - Sunset and sunrise times
//! - [`api`] - Read-only status API
//! - [`logging`] - Tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod app;
pub mod hue;
pub mod logging;
pub mod state;
pub mod sun;
