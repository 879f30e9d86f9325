//! ICMP echo probing.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, SystemTime};

use surge_ping::{Client, Config, PingIdentifier, PingSequence};

const PAYLOAD: [u8; 56] = [0u8; 56];

/// Generates a ping identifier that differs between probes
fn rand_id() -> u16 {
    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    #[allow(clippy::cast_possible_truncation)]
    let id = (duration.as_nanos() % 0xFFFF) as u16;
    id.wrapping_add(1)
}

/// Opens the ICMP client. Needs raw socket privileges (or a permitted
/// `net.ipv4.ping_group_range` on Linux); `None` when unavailable.
#[must_use]
pub fn client() -> Option<Client> {
    match Client::new(&Config::default()) {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "ICMP client unavailable, echo probes disabled");
            None
        }
    }
}

/// Sends one echo request and waits up to `timeout` for the reply.
pub async fn echo(client: &Client, ip: Ipv4Addr, sequence: u16, timeout: Duration) -> bool {
    let mut pinger = client.pinger(IpAddr::V4(ip), PingIdentifier(rand_id())).await;
    pinger.timeout(timeout);
    pinger.ping(PingSequence(sequence), &PAYLOAD).await.is_ok()
}
