//! Link-layer probing with broadcast ARP requests.
//!
//! Everything here blocks on the datalink channel and is meant to run on a
//! blocking thread. Reads are bounded by the channel read timeout.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;

use super::interface::{open_channel, InterfaceInfo};
use crate::listener::CaptureError;

/// Broadcast MAC address for ARP requests
const BROADCAST_MAC: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);

const FRAME_LEN: usize = 42;

/// Upper bound on a single channel read while waiting for a reply.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Builds an Ethernet frame carrying an ARP who-has for `target_ip`.
#[must_use]
pub fn build_request(source_mac: MacAddr, source_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut buffer = vec![0u8; FRAME_LEN];

    if let Some(mut ethernet) = MutableEthernetPacket::new(&mut buffer[..14]) {
        ethernet.set_destination(BROADCAST_MAC);
        ethernet.set_source(source_mac);
        ethernet.set_ethertype(EtherTypes::Arp);
    }

    if let Some(mut arp) = MutableArpPacket::new(&mut buffer[14..]) {
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(source_mac);
        arp.set_sender_proto_addr(source_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target_ip);
    }

    buffer
}

/// Returns `true` if `frame` is an ARP reply sent by `target_ip`.
#[must_use]
pub fn is_reply_from(frame: &[u8], target_ip: Ipv4Addr) -> bool {
    let Some(ethernet) = EthernetPacket::new(frame) else {
        return false;
    };
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return false;
    }
    ArpPacket::new(ethernet.payload()).is_some_and(|arp| {
        arp.get_operation() == ArpOperations::Reply && arp.get_sender_proto_addr() == target_ip
    })
}

/// Sends one ARP request to `target` and waits up to `wait` for its reply.
pub fn probe_once(interface: &InterfaceInfo, target: Ipv4Addr, wait: Duration) -> bool {
    let (mut tx, mut rx) = match open_channel(interface, READ_SLICE.min(wait)) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!(ip = %target, error = %e, "ARP probe unavailable");
            return false;
        }
    };

    let request = build_request(interface.mac, interface.ip, target);
    match tx.send_to(&request, None) {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            tracing::debug!(ip = %target, error = %e, "ARP request send failed");
            return false;
        }
        None => return false,
    }

    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if let Ok(frame) = rx.next() {
            if is_reply_from(frame, target) {
                return true;
            }
        }
    }
    false
}

/// Broadcasts an ARP request to every target without waiting for replies.
///
/// Replies are picked up by the passive listener. Returns how many requests
/// were sent.
///
/// # Errors
///
/// Returns an error if the datalink channel cannot be opened.
pub fn announce(interface: &InterfaceInfo, targets: &[Ipv4Addr]) -> Result<usize, CaptureError> {
    let (mut tx, _rx) = open_channel(interface, READ_SLICE)?;
    let mut sent = 0;
    for &target in targets {
        let request = build_request(interface.mac, interface.ip, target);
        if matches!(tx.send_to(&request, None), Some(Ok(()))) {
            sent += 1;
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OURS: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x01);
    const THEIRS: MacAddr = MacAddr(0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x01);

    fn reply(sender_ip: Ipv4Addr) -> Vec<u8> {
        let mut frame = build_request(THEIRS, sender_ip, Ipv4Addr::new(10, 0, 0, 1));
        let mut arp = MutableArpPacket::new(&mut frame[14..]).unwrap();
        arp.set_operation(ArpOperations::Reply);
        frame
    }

    #[test]
    fn test_build_request_layout() {
        let frame = build_request(OURS, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(frame.len(), FRAME_LEN);

        let ethernet = EthernetPacket::new(&frame).unwrap();
        assert_eq!(ethernet.get_destination(), BROADCAST_MAC);
        assert_eq!(ethernet.get_source(), OURS);
        assert_eq!(ethernet.get_ethertype(), EtherTypes::Arp);

        let arp = ArpPacket::new(ethernet.payload()).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Request);
        assert_eq!(arp.get_target_proto_addr(), Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_reply_matching() {
        let target = Ipv4Addr::new(10, 0, 0, 5);
        assert!(is_reply_from(&reply(target), target));
        assert!(!is_reply_from(&reply(Ipv4Addr::new(10, 0, 0, 6)), target));

        // a request from the target is not an answer
        let request = build_request(THEIRS, target, Ipv4Addr::new(10, 0, 0, 1));
        assert!(!is_reply_from(&request, target));

        assert!(!is_reply_from(&[0u8; 4], target));
    }
}
