//! TCP service probing.
//!
//! Some phones drop ARP and ICMP while asleep but still answer on service
//! ports. Any answer counts: a completed handshake or a reset both prove the
//! host is up.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpStream;

/// Attempts one connection to `ip:port`. The caller bounds the wait.
pub async fn knock(ip: Ipv4Addr, port: u16) -> bool {
    match TcpStream::connect(SocketAddr::from((ip, port))).await {
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => true,
        Err(e) => {
            tracing::trace!(%ip, port, error = %e, "TCP knock failed");
            false
        }
    }
}
