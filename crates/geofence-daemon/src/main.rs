//! # geofence-daemon
//!
//! Lights on when someone gets home, off when everyone has left.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! GEOFENCE_CONFIG=./config.toml cargo run --package geofence-daemon
//!
//! # Production (on Raspberry Pi, needs CAP_NET_RAW)
//! ./geofence-daemon
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::process::ExitCode;

use geofence_core::Config;
use geofence_daemon::{app, logging};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hue-geofence: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("hue-geofence: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hue-geofence");

    match app::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "hue-geofence stopped");
            ExitCode::FAILURE
        }
    }
}
