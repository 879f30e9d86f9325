//! Liveness probes for a single host.
//!
//! [`Prober`] is the seam between the presence tracker and the network. The
//! production implementation, [`NetworkProber`], checks a host with, in order:
//!
//! 1. a broadcast ARP request
//! 2. an ICMP echo request
//! 3. TCP connection attempts to a short list of service ports
//!
//! and stops at the first answer. The Bluetooth probe pages the device's
//! Bluetooth address, resolved from the roster. Every probe is bounded by a
//! [`RetryPolicy`], so a call always finishes in predictable time.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use pnet::util::MacAddr;
use surge_ping::Client;
use tokio::net::UdpSocket;

use crate::bluetooth;
use crate::config::ProbeConfig;
use crate::error::GeofenceError;
use crate::roster::Roster;

pub mod arp;
pub mod icmp;
pub mod interface;
mod retry;
pub mod tcp;

pub use interface::{find_interface, InterfaceInfo};
pub use retry::RetryPolicy;

/// UDP discard port, used to make the kernel resolve a neighbour.
const DISCARD_PORT: u16 = 9;

/// Liveness checks used by the presence tracker.
///
/// Implementations hold no presence state and may be called concurrently for
/// different hosts.
pub trait Prober: Send + Sync + 'static {
    /// Whether the host at `ip` answers any network probe.
    fn probe_network(&self, ip: Ipv4Addr) -> impl Future<Output = bool> + Send;

    /// Whether the Bluetooth radio mapped to `link` answers.
    ///
    /// Returns `false` immediately when `link` has no Bluetooth mapping.
    fn probe_wireless(&self, link: MacAddr) -> impl Future<Output = bool> + Send;

    /// Provoke traffic from every target without waiting for answers.
    ///
    /// Returns how many targets were stimulated.
    fn stimulate(&self, targets: Vec<Ipv4Addr>) -> impl Future<Output = usize> + Send;
}

/// Probes hosts over the real network.
pub struct NetworkProber {
    roster: Arc<Roster>,
    interface: Option<InterfaceInfo>,
    icmp: Option<Client>,
    arp_policy: RetryPolicy,
    icmp_policy: RetryPolicy,
    tcp_policy: RetryPolicy,
    wireless_policy: RetryPolicy,
    tcp_ports: Vec<u16>,
}

impl NetworkProber {
    /// Create a prober.
    ///
    /// Without an `interface` the ARP stage is skipped. Must be called inside
    /// a Tokio runtime (the ICMP client registers with the reactor).
    #[must_use]
    pub fn new(roster: Arc<Roster>, config: &ProbeConfig, interface: Option<InterfaceInfo>) -> Self {
        if interface.is_none() {
            tracing::warn!("No capture interface, ARP probes disabled");
        }
        Self {
            roster,
            interface,
            icmp: icmp::client(),
            arp_policy: config.arp_policy(),
            icmp_policy: config.icmp_policy(),
            tcp_policy: config.tcp_policy(),
            wireless_policy: config.wireless_policy(),
            tcp_ports: config.tcp_ports.clone(),
        }
    }

    async fn probe_arp(&self, ip: Ipv4Addr) -> bool {
        let Some(interface) = &self.interface else {
            return false;
        };
        let wait = self.arp_policy.timeout();
        self.arp_policy
            .run(|_| {
                let interface = interface.clone();
                async move {
                    tokio::task::spawn_blocking(move || arp::probe_once(&interface, ip, wait))
                        .await
                        .unwrap_or(false)
                }
            })
            .await
    }

    async fn probe_icmp(&self, ip: Ipv4Addr) -> bool {
        let Some(client) = &self.icmp else {
            return false;
        };
        let timeout = self.icmp_policy.timeout();
        self.icmp_policy
            .run(|n| icmp::echo(client, ip, u16::try_from(n).unwrap_or(u16::MAX), timeout))
            .await
    }

    async fn probe_tcp(&self, ip: Ipv4Addr) -> Option<u16> {
        for &port in &self.tcp_ports {
            if self.tcp_policy.run(|_| tcp::knock(ip, port)).await {
                return Some(port);
            }
        }
        None
    }

    async fn nudge(targets: &[Ipv4Addr]) -> usize {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot open UDP socket for scan");
                return 0;
            }
        };
        let mut sent = 0;
        for &target in targets {
            if socket.send_to(&[], (target, DISCARD_PORT)).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

impl Prober for NetworkProber {
    async fn probe_network(&self, ip: Ipv4Addr) -> bool {
        if self.probe_arp(ip).await {
            tracing::debug!(%ip, "Host is up, responding to ARP");
            return true;
        }
        if self.probe_icmp(ip).await {
            tracing::debug!(%ip, "Host is up, responding to ICMP echo");
            return true;
        }
        if let Some(port) = self.probe_tcp(ip).await {
            tracing::debug!(%ip, port, "Host is up, responding on TCP");
            return true;
        }
        tracing::debug!(%ip, "Host did not answer any probe");
        false
    }

    async fn probe_wireless(&self, link: MacAddr) -> bool {
        let Some(bt) = self.roster.wireless_address(&link) else {
            return false;
        };
        let up = self.wireless_policy.run(|_| bluetooth::page(bt)).await;
        if up {
            tracing::debug!(mac = %link, %bt, "Host is up, responding to Bluetooth");
        }
        up
    }

    async fn stimulate(&self, targets: Vec<Ipv4Addr>) -> usize {
        if let Some(interface) = &self.interface {
            let interface = interface.clone();
            let arp_targets = targets.clone();
            match tokio::task::spawn_blocking(move || arp::announce(&interface, &arp_targets)).await {
                Ok(Ok(sent)) => return sent,
                Ok(Err(e)) => {
                    let err = GeofenceError::from(e);
                    tracing::warn!(
                        error = %err,
                        code = err.error_code(),
                        "ARP scan failed, falling back to UDP"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "ARP scan task failed, falling back to UDP"),
            }
        }
        Self::nudge(&targets).await
    }
}
