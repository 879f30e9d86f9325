//! Network interface selection for capture and link-layer probing.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::util::MacAddr;

use crate::listener::CaptureError;

/// A usable IPv4 interface with its hardware address.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g. `wlan0`).
    pub name: String,
    /// Our IPv4 address on this interface.
    pub ip: Ipv4Addr,
    /// Our hardware address on this interface.
    pub mac: MacAddr,
    /// The underlying pnet interface.
    pub pnet_interface: NetworkInterface,
}

fn is_virtual_adapter_name(name_lower: &str) -> bool {
    name_lower.starts_with("docker")
        || name_lower.starts_with("veth")
        || name_lower.starts_with("br-")
        || name_lower.starts_with("virbr")
        || name_lower.contains("vmware")
        || name_lower.contains("virtualbox")
}

fn usable_ipv4(iface: &NetworkInterface) -> Option<Ipv4Addr> {
    iface.ips.iter().find_map(|network| match network.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_link_local() && network.prefix() > 0 => {
            Some(ip)
        }
        _ => None,
    })
}

fn to_info(iface: &NetworkInterface) -> Option<InterfaceInfo> {
    let mac = match iface.mac {
        Some(m) if m != MacAddr::zero() => m,
        _ => return None,
    };
    Some(InterfaceInfo {
        name: iface.name.clone(),
        ip: usable_ipv4(iface)?,
        mac,
        pnet_interface: iface.clone(),
    })
}

/// Scores an address for interface selection; home LANs first.
#[must_use]
pub fn interface_score(ip: &Ipv4Addr) -> u32 {
    let octets = ip.octets();
    match octets[0] {
        192 if octets[1] == 168 => 100,
        10 => 90,
        172 if (16..=31).contains(&octets[1]) => 50,
        _ => 70,
    }
}

/// Find the interface to capture and probe on.
///
/// With a name, that interface must exist and carry an IPv4 address and MAC.
/// Without one, the best up, non-loopback, non-virtual interface is picked.
///
/// # Errors
///
/// Returns [`CaptureError::InterfaceNotFound`] if nothing usable exists.
pub fn find_interface(name: Option<&str>) -> Result<InterfaceInfo, CaptureError> {
    let interfaces = datalink::interfaces();

    if let Some(name) = name {
        return interfaces
            .iter()
            .find(|iface| iface.name == name)
            .and_then(to_info)
            .ok_or_else(|| CaptureError::InterfaceNotFound {
                name: name.to_string(),
            });
    }

    let mut candidates: Vec<InterfaceInfo> = interfaces
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .filter(|iface| !is_virtual_adapter_name(&iface.name.to_lowercase()))
        .filter_map(to_info)
        .collect();

    candidates.sort_by_key(|info| std::cmp::Reverse(interface_score(&info.ip)));

    match candidates.into_iter().next() {
        Some(best) => {
            tracing::debug!(
                interface = %best.name,
                ip = %best.ip,
                mac = %best.mac,
                "Selected network interface"
            );
            Ok(best)
        }
        None => Err(CaptureError::InterfaceNotFound {
            name: "<auto>".to_string(),
        }),
    }
}

/// Opens an ethernet channel whose reads give up after `read_timeout`.
pub(crate) fn open_channel(
    interface: &InterfaceInfo,
    read_timeout: Duration,
) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>), CaptureError> {
    let config = datalink::Config {
        read_timeout: Some(read_timeout),
        ..Default::default()
    };
    match datalink::channel(&interface.pnet_interface, config) {
        Ok(Channel::Ethernet(tx, rx)) => Ok((tx, rx)),
        Ok(_) => Err(CaptureError::UnsupportedChannel {
            interface: interface.name.clone(),
        }),
        Err(source) => Err(CaptureError::Open {
            interface: interface.name.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_score_prefers_home_lan() {
        let home = interface_score(&Ipv4Addr::new(192, 168, 1, 10));
        let office = interface_score(&Ipv4Addr::new(10, 0, 0, 10));
        let bridge = interface_score(&Ipv4Addr::new(172, 17, 0, 1));
        assert!(home > office);
        assert!(office > bridge);
    }

    #[test]
    fn test_virtual_names() {
        assert!(is_virtual_adapter_name("docker0"));
        assert!(is_virtual_adapter_name("veth12ab"));
        assert!(!is_virtual_adapter_name("wlan0"));
        assert!(!is_virtual_adapter_name("eth0"));
    }

    #[test]
    fn test_unknown_named_interface() {
        let err = find_interface(Some("definitely-not-an-interface0")).unwrap_err();
        assert!(matches!(err, CaptureError::InterfaceNotFound { .. }));
    }
}
