//! Daemon bootstrap.
//!
//! Wires the configured roster into a [`PresenceTracker`], starts passive
//! capture, the event dispatcher, the periodic tasks and (optionally) the
//! status API, then waits for Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use geofence_core::{
    bluetooth, dispatch, find_interface, CaptureFilter, Config, EventDispatcher, GeofenceError,
    InterfaceSource, ListenerControl, NetworkProber, PassiveListener, PresenceTracker,
    PresenceView, Prober, ScanOutcome, Scheduler, SweepOutcome,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::create_router;
use crate::hue::Lights;
use crate::state::AppState;
use crate::sun::SunClock;

/// How often sunset and sunrise times are refreshed.
pub const SUN_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Run the daemon until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the roster or range is invalid, the listener thread
/// cannot be spawned, or the status API cannot bind.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let roster = Arc::new(config.roster()?);
    let range = config.network_range()?;
    info!(devices = roster.len(), range = %range, "Tracking roster");

    if roster.iter().any(|device| device.wireless_address.is_some()) {
        if let Err(e) = bluetooth::check_adapter().await {
            warn!(error = %e, "Bluetooth probes will report mapped devices as absent");
        }
    }

    let interface = match find_interface(config.network.interface.as_deref()) {
        Ok(interface) => {
            info!(interface = %interface.name, ip = %interface.ip, "Using network interface");
            Some(interface)
        }
        Err(e) => {
            let err = GeofenceError::from(e);
            warn!(
                error = %err,
                code = err.error_code(),
                "No usable interface, ARP probes disabled"
            );
            None
        }
    };

    let prober = Arc::new(NetworkProber::new(
        Arc::clone(&roster),
        &config.probe,
        interface,
    ));
    let control = ListenerControl::new();
    let (events_tx, events_rx) = dispatch::channel();
    let tracker = Arc::new(PresenceTracker::new(
        Arc::clone(&roster),
        prober,
        range,
        control.clone(),
        events_tx,
    ));

    let filter = CaptureFilter::from_roster(&roster);
    debug!(filter = %filter.expression(), "Passive capture filter");
    let source = InterfaceSource::new(
        config.network.interface.clone(),
        config.listener.read_timeout(),
    );
    PassiveListener::new(
        source,
        filter,
        control.clone(),
        Arc::clone(&tracker),
        config.listener.clone(),
    )
    .spawn()
    .context("failed to spawn passive listener")?;

    let sun = Arc::new(SunClock::new(config.location)?);
    if let Err(e) = sun.refresh().await {
        warn!(error = %e, "Initial sun times refresh failed");
    }

    let lights = Arc::new(Lights::from_config(&config.lights, Arc::clone(&sun))?);
    let dispatcher = EventDispatcher::new(lights, events_rx).spawn();

    initial_scan(
        &tracker,
        config.schedule.initial_scan_rounds,
        config.schedule.initial_scan_settle(),
    )
    .await;

    let scheduler = schedule(&config, &tracker, &sun).spawn();

    let server = if config.server.enabled {
        let presence: Arc<dyn PresenceView> = tracker;
        Some(serve(&config.server.bind, AppState::new(presence)).await?)
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    control.shutdown();
    scheduler.abort();
    dispatcher.abort();
    if let Some(server) = server {
        server.abort();
    }
    Ok(())
}

/// Sweep the whole range a few times to seed the online set.
///
/// Each round is followed by `settle`, so the passive listener sees the
/// replies before the next round and before periodic tasks start.
pub async fn initial_scan<P: Prober>(
    tracker: &PresenceTracker<P>,
    rounds: u32,
    settle: Duration,
) {
    for round in 1..=rounds {
        match tracker.active_scan().await {
            ScanOutcome::Skipped => {
                debug!(round, "Everyone already online, initial scan done");
                break;
            }
            ScanOutcome::Stimulated(targets) => {
                debug!(round, targets, "Initial scan round");
                tokio::time::sleep(settle).await;
            }
        }
    }
    info!(online = tracker.online_records().len(), "Initial scan complete");
}

fn schedule(
    config: &Config,
    tracker: &Arc<PresenceTracker<NetworkProber>>,
    sun: &Arc<SunClock>,
) -> Scheduler {
    let mut scheduler = Scheduler::new(config.schedule.tick());

    if config.schedule.active_scan_enabled {
        let tracker = Arc::clone(tracker);
        scheduler = scheduler.every("active_scan", config.schedule.scan_interval(), move || {
            let tracker = Arc::clone(&tracker);
            async move {
                if let ScanOutcome::Stimulated(targets) = tracker.active_scan().await {
                    debug!(targets, "Active scan sent");
                }
                Ok(())
            }
        });
    }

    let liveness = Arc::clone(tracker);
    let wireless = Arc::clone(tracker);
    let sun = Arc::clone(sun);

    scheduler
        .every("liveness", config.schedule.liveness_interval(), move || {
            let tracker = Arc::clone(&liveness);
            async move {
                log_sweep("liveness", tracker.sweep_liveness().await);
                Ok(())
            }
        })
        .every("wireless", config.schedule.wireless_interval(), move || {
            let tracker = Arc::clone(&wireless);
            async move {
                log_sweep("wireless", tracker.sweep_wireless().await);
                Ok(())
            }
        })
        .every("sun_refresh", SUN_REFRESH_INTERVAL, move || {
            let sun = Arc::clone(&sun);
            async move { sun.refresh().await }
        })
}

fn log_sweep(sweep: &str, outcome: SweepOutcome) {
    match outcome {
        SweepOutcome::Skipped => debug!(sweep, "Sweep already running, skipped"),
        SweepOutcome::Completed {
            checked,
            transitions,
        } => debug!(sweep, checked, transitions, "Sweep complete"),
    }
}

async fn serve(bind: &str, state: AppState) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind status API on {bind}"))?;
    info!("Status API listening on {}", listener.local_addr()?);

    let app = create_router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Status API stopped");
        }
    }))
}
