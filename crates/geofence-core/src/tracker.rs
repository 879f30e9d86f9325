//! The presence tracker.
//!
//! Owns the online set and reconciles the three evidence sources:
//!
//! - passive observations from the listener ([`PresenceTracker::on_observed`])
//! - periodic liveness re-checks of online devices ([`PresenceTracker::sweep_liveness`])
//! - periodic Bluetooth checks of every mapped device ([`PresenceTracker::sweep_wireless`])
//!
//! and stimulates traffic with [`PresenceTracker::active_scan`]. Transitions are
//! pushed to the event channel; the tracker never waits for them to be handled.
//!
//! The online set lives behind a synchronous mutex that is only held for short
//! read-modify-write sections, never across a probe.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use pnet::util::MacAddr;

use crate::dispatch::{EventSender, PresenceEvent};
use crate::flight::SingleFlight;
use crate::listener::{ListenerControl, Observation, ObservationSink};
use crate::probe::Prober;
use crate::roster::Roster;
use crate::types::{DeviceStatus, OnlineDevice, PresenceSnapshot};

/// A device currently considered online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineRecord {
    /// The device.
    pub link_address: MacAddr,
    /// Last IPv4 address seen, absent when only confirmed over Bluetooth.
    pub network_address: Option<Ipv4Addr>,
    /// Last confirmation.
    pub last_seen: DateTime<Utc>,
}

/// Result of a periodic sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep of the same kind was running.
    Skipped,
    /// The sweep ran.
    Completed {
        /// Devices probed.
        checked: usize,
        /// Departures (liveness) or arrivals (wireless) caused by the sweep.
        transitions: usize,
    },
}

/// Result of an active scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every tracked device is online.
    Skipped,
    /// This many hosts were stimulated.
    Stimulated(usize),
}

/// Read-only access to presence state.
pub trait PresenceView: Send + Sync {
    /// The whole online set.
    fn snapshot(&self) -> PresenceSnapshot;

    /// Status of one device; `None` when it is not tracked.
    fn device(&self, link_address: &MacAddr) -> Option<DeviceStatus>;
}

/// Maintains the set of online devices.
pub struct PresenceTracker<P> {
    roster: Arc<Roster>,
    prober: Arc<P>,
    range: Ipv4Network,
    online: Mutex<HashMap<MacAddr, OnlineRecord>>,
    discovered_hosts: Mutex<HashSet<Ipv4Addr>>,
    liveness_flight: SingleFlight,
    wireless_flight: SingleFlight,
    listener: ListenerControl,
    events: EventSender,
}

impl<P: Prober> PresenceTracker<P> {
    /// Create a tracker with an empty online set.
    ///
    /// `range` is the network swept by [`Self::active_scan`]. `listener` is
    /// paused while every device is online. Transitions go to `events`.
    #[must_use]
    pub fn new(
        roster: Arc<Roster>,
        prober: Arc<P>,
        range: Ipv4Network,
        listener: ListenerControl,
        events: EventSender,
    ) -> Self {
        Self {
            roster,
            prober,
            range,
            online: Mutex::new(HashMap::new()),
            discovered_hosts: Mutex::new(HashSet::new()),
            liveness_flight: SingleFlight::new(),
            wireless_flight: SingleFlight::new(),
            listener,
            events,
        }
    }

    /// The tracked devices.
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The listener switch this tracker drives.
    #[must_use]
    pub const fn listener(&self) -> &ListenerControl {
        &self.listener
    }

    fn online_set(&self) -> MutexGuard<'_, HashMap<MacAddr, OnlineRecord>> {
        self.online.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discovered(&self) -> MutexGuard<'_, HashSet<Ipv4Addr>> {
        self.discovered_hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PresenceEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!(?event, "No dispatcher listening, presence event dropped");
        }
    }

    /// Handle a tracked device seen on the network.
    ///
    /// Untracked devices and `0.0.0.0` are ignored. Returns `true` if this
    /// observation made the device arrive.
    pub fn on_observed(&self, link_address: MacAddr, network_address: Ipv4Addr) -> bool {
        if !self.roster.contains(&link_address) || network_address.is_unspecified() {
            return false;
        }
        self.discovered().insert(network_address);
        self.mark_online(link_address, Some(network_address))
    }

    /// Insert or refresh a record; emits an arrival on insertion.
    fn mark_online(&self, link_address: MacAddr, network_address: Option<Ipv4Addr>) -> bool {
        let now = Utc::now();
        let mut online = self.online_set();
        match online.entry(link_address) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.last_seen = now;
                if network_address.is_some() {
                    record.network_address = network_address;
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(OnlineRecord {
                    link_address,
                    network_address,
                    last_seen: now,
                });
                tracing::info!(
                    mac = %link_address,
                    ip = ?network_address,
                    online = online.len(),
                    "Device arrived"
                );
                self.emit(PresenceEvent::Arrived {
                    link_address,
                    network_address,
                });
                if online.len() == self.roster.len() {
                    self.listener.pause();
                }
                true
            }
        }
    }

    /// Re-check every online device and remove the ones that do not answer.
    ///
    /// A device with a known IPv4 address is probed over the network first;
    /// the Bluetooth probe is its fallback and the only check for devices
    /// without one. Emits one all-departed event if this sweep emptied the
    /// online set. A call made while a sweep is running returns
    /// [`SweepOutcome::Skipped`].
    pub async fn sweep_liveness(&self) -> SweepOutcome {
        let Some(_flight) = self.liveness_flight.try_acquire() else {
            tracing::debug!("Liveness sweep already running, skipping");
            return SweepOutcome::Skipped;
        };

        let snapshot: Vec<OnlineRecord> = self.online_set().values().copied().collect();
        tracing::debug!(devices = snapshot.len(), "Liveness sweep started");

        let mut departed = 0;
        for record in &snapshot {
            if self.is_alive(record).await {
                if let Some(current) = self.online_set().get_mut(&record.link_address) {
                    current.last_seen = Utc::now();
                }
            } else if self.remove_if_stale(record) {
                departed += 1;
            }
        }

        if departed > 0 {
            let online = self.online_set();
            // a departed device may have been seen again before the sweep ended
            if online.len() < self.roster.len() {
                self.listener.resume();
            }
            if online.is_empty() {
                tracing::info!("All devices departed");
                self.emit(PresenceEvent::AllDeparted);
            }
        }

        SweepOutcome::Completed {
            checked: snapshot.len(),
            transitions: departed,
        }
    }

    async fn is_alive(&self, record: &OnlineRecord) -> bool {
        if let Some(ip) = record.network_address {
            if self.prober.probe_network(ip).await {
                return true;
            }
        }
        self.prober.probe_wireless(record.link_address).await
    }

    /// Remove a device that failed its probes, unless it was confirmed again
    /// after the sweep took its snapshot.
    fn remove_if_stale(&self, probed: &OnlineRecord) -> bool {
        let mut online = self.online_set();
        match online.get(&probed.link_address) {
            Some(current) if current.last_seen <= probed.last_seen => {
                online.remove(&probed.link_address);
                tracing::info!(
                    mac = %probed.link_address,
                    ip = ?probed.network_address,
                    online = online.len(),
                    "Device departed"
                );
                true
            }
            Some(_) => {
                tracing::debug!(mac = %probed.link_address, "Device seen during sweep, keeping");
                false
            }
            None => false,
        }
    }

    /// Page every device with a Bluetooth mapping and mark responders online.
    ///
    /// Responders that were offline arrive as Bluetooth-only records.
    pub async fn sweep_wireless(&self) -> SweepOutcome {
        let Some(_flight) = self.wireless_flight.try_acquire() else {
            tracing::debug!("Bluetooth sweep already running, skipping");
            return SweepOutcome::Skipped;
        };

        let mapped: Vec<MacAddr> = self
            .roster
            .iter()
            .filter(|device| device.wireless_address.is_some())
            .map(|device| device.link_address)
            .collect();

        let mut arrived = 0;
        for &link_address in &mapped {
            if self.prober.probe_wireless(link_address).await
                && self.mark_online(link_address, None)
            {
                arrived += 1;
            }
        }

        SweepOutcome::Completed {
            checked: mapped.len(),
            transitions: arrived,
        }
    }

    /// Stimulate every known and in-range host so the listener sees traffic.
    ///
    /// Skipped while every tracked device is online.
    pub async fn active_scan(&self) -> ScanOutcome {
        if self.is_all_online() {
            self.listener.pause();
            tracing::debug!("All devices online, skipping active scan");
            return ScanOutcome::Skipped;
        }

        let targets = self.scan_targets();
        tracing::debug!(targets = targets.len(), range = %self.range, "Active scan started");
        let stimulated = self.prober.stimulate(targets).await;
        ScanOutcome::Stimulated(stimulated)
    }

    /// Previously seen hosts first, then the configured range without its
    /// network and broadcast addresses.
    fn scan_targets(&self) -> Vec<Ipv4Addr> {
        let known: BTreeSet<Ipv4Addr> = self.discovered().iter().copied().collect();
        let edges = if self.range.prefix() < 31 {
            vec![self.range.network(), self.range.broadcast()]
        } else {
            Vec::new()
        };

        let mut targets: Vec<Ipv4Addr> = known.iter().copied().collect();
        targets.extend(
            self.range
                .iter()
                .filter(|ip| !edges.contains(ip) && !known.contains(ip)),
        );
        targets
    }

    /// Copies of the online records.
    #[must_use]
    pub fn online_records(&self) -> Vec<OnlineRecord> {
        self.online_set().values().copied().collect()
    }

    /// The record of one device, if online.
    #[must_use]
    pub fn record(&self, link_address: &MacAddr) -> Option<OnlineRecord> {
        self.online_set().get(link_address).copied()
    }

    /// Whether every tracked device is online.
    #[must_use]
    pub fn is_all_online(&self) -> bool {
        self.online_set().len() == self.roster.len()
    }

    /// Hosts seen for tracked devices so far.
    #[must_use]
    pub fn discovered_hosts(&self) -> Vec<Ipv4Addr> {
        self.discovered().iter().copied().collect()
    }
}

impl<P: Prober> ObservationSink for PresenceTracker<P> {
    fn observe(&self, observation: Observation) {
        self.on_observed(observation.link_address, observation.network_address);
    }
}

impl<P: Prober> PresenceView for PresenceTracker<P> {
    fn snapshot(&self) -> PresenceSnapshot {
        let mut online: Vec<OnlineDevice> = self
            .online_set()
            .values()
            .map(OnlineDevice::from)
            .collect();
        online.sort_by(|a, b| a.link_address.cmp(&b.link_address));

        PresenceSnapshot {
            roster_size: self.roster.len(),
            all_online: online.len() == self.roster.len(),
            listener_paused: self.listener.is_paused(),
            online,
        }
    }

    fn device(&self, link_address: &MacAddr) -> Option<DeviceStatus> {
        if !self.roster.contains(link_address) {
            return None;
        }
        let record = self.record(link_address);
        Some(DeviceStatus {
            link_address: link_address.to_string(),
            online: record.is_some(),
            bluetooth_mapped: self.roster.wireless_address(link_address).is_some(),
            record: record.as_ref().map(OnlineDevice::from),
        })
    }
}
