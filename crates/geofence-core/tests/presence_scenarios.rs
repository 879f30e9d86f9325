//! End-to-end presence scenarios: tracker, scheduler and dispatcher wired
//! together the way the daemon wires them, with scripted probes and lights.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geofence_core::{
    dispatch, parse_mac, EventDispatcher, LightController, ListenerControl, MacAddr,
    PresenceTracker, Prober, Roster, Scheduler,
};

#[derive(Default)]
struct ScriptedProber {
    reachable: Mutex<HashSet<Ipv4Addr>>,
    paged: Mutex<HashSet<MacAddr>>,
    network_probes: AtomicUsize,
}

impl Prober for ScriptedProber {
    async fn probe_network(&self, ip: Ipv4Addr) -> bool {
        self.network_probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.lock().unwrap().contains(&ip)
    }

    async fn probe_wireless(&self, link: MacAddr) -> bool {
        self.paged.lock().unwrap().contains(&link)
    }

    async fn stimulate(&self, targets: Vec<Ipv4Addr>) -> usize {
        targets.len()
    }
}

#[derive(Default)]
struct CountingLights {
    arrivals: AtomicUsize,
    departures: AtomicUsize,
}

impl LightController for CountingLights {
    async fn on_arrive(&self) -> anyhow::Result<()> {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_depart(&self) -> anyhow::Result<()> {
        self.departures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Home {
    tracker: Arc<PresenceTracker<ScriptedProber>>,
    prober: Arc<ScriptedProber>,
    lights: Arc<CountingLights>,
}

fn mac(s: &str) -> MacAddr {
    parse_mac(s).unwrap()
}

fn home(devices: &[&str], bluetooth: &[(&str, &str)]) -> Home {
    let bluetooth: HashMap<String, String> = bluetooth
        .iter()
        .map(|(wifi, bt)| ((*wifi).to_string(), (*bt).to_string()))
        .collect();
    let roster = Arc::new(Roster::parse(devices, &bluetooth).unwrap());
    let prober = Arc::new(ScriptedProber::default());
    let lights = Arc::new(CountingLights::default());

    let (tx, rx) = dispatch::channel();
    let tracker = Arc::new(PresenceTracker::new(
        roster,
        Arc::clone(&prober),
        "192.168.1.0/24".parse().unwrap(),
        ListenerControl::new(),
        tx,
    ));
    EventDispatcher::new(Arc::clone(&lights), rx).spawn();

    Home {
        tracker,
        prober,
        lights,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_arrival_and_departure_drive_lights() {
    let home = home(&["AA:AA:AA:AA:AA:01"], &[]);

    home.tracker
        .on_observed(mac("aa:aa:aa:aa:aa:01"), Ipv4Addr::new(192, 168, 1, 20));
    home.tracker
        .on_observed(mac("AA:AA:AA:AA:AA:01"), Ipv4Addr::new(192, 168, 1, 20));
    settle().await;
    assert_eq!(home.lights.arrivals.load(Ordering::SeqCst), 1);

    home.tracker.sweep_liveness().await;
    settle().await;
    assert_eq!(home.lights.departures.load(Ordering::SeqCst), 1);
    assert!(home.tracker.online_records().is_empty());
}

#[tokio::test]
async fn test_one_of_two_leaving_keeps_lights_on() {
    let home = home(&["AA:AA:AA:AA:AA:01", "AA:AA:AA:AA:AA:02"], &[]);
    home.prober
        .reachable
        .lock()
        .unwrap()
        .insert(Ipv4Addr::new(192, 168, 1, 21));

    home.tracker
        .on_observed(mac("AA:AA:AA:AA:AA:01"), Ipv4Addr::new(192, 168, 1, 20));
    home.tracker
        .on_observed(mac("AA:AA:AA:AA:AA:02"), Ipv4Addr::new(192, 168, 1, 21));
    assert!(home.tracker.listener().is_paused());

    home.tracker.sweep_liveness().await;
    settle().await;

    assert_eq!(home.lights.arrivals.load(Ordering::SeqCst), 2);
    assert_eq!(home.lights.departures.load(Ordering::SeqCst), 0);
    assert!(!home.tracker.listener().is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_sweeps_track_bluetooth_phone() {
    let home = home(&["AA:AA:AA:AA:AA:01"], &[("AA:AA:AA:AA:AA:01", "11:22:33:44:55:66")]);
    home.prober
        .paged
        .lock()
        .unwrap()
        .insert(mac("AA:AA:AA:AA:AA:01"));

    let wireless = Arc::clone(&home.tracker);
    let liveness = Arc::clone(&home.tracker);
    let scheduler = Scheduler::new(Duration::from_secs(1))
        .every("wireless", Duration::from_secs(10), move || {
            let tracker = Arc::clone(&wireless);
            async move {
                tracker.sweep_wireless().await;
                Ok(())
            }
        })
        .every("liveness", Duration::from_secs(4), move || {
            let tracker = Arc::clone(&liveness);
            async move {
                tracker.sweep_liveness().await;
                Ok(())
            }
        })
        .spawn();

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(home.lights.arrivals.load(Ordering::SeqCst), 1);
    assert!(home.tracker.is_all_online());

    home.prober.paged.lock().unwrap().clear();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(home.lights.departures.load(Ordering::SeqCst), 1);
    assert_eq!(home.prober.network_probes.load(Ordering::SeqCst), 0);
    scheduler.abort();
}
