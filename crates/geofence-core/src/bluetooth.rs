//! Bluetooth Classic presence probing.
//!
//! A phone in range answers a baseband page even when its Wi-Fi radio is
//! asleep. This module pages a device by opening an L2CAP connection to its
//! SDP service, which every BR/EDR device exposes:
//! - a completed connection means the device is present
//! - a refused connection also means the device answered the page
//! - a timeout or host-down means it is out of range or powered off
//!
//! Requires the `bluetooth` feature (BlueZ via bluer). Without it every probe
//! reports the device as absent.

use pnet::util::MacAddr;

use crate::error::{GeofenceError, Result};

/// Protocol/service multiplexer of the SDP service.
pub const SDP_PSM: u16 = 0x0001;

/// Pages `address` once. The caller bounds the wait.
#[cfg(feature = "bluetooth")]
pub async fn page(address: MacAddr) -> bool {
    use bluer::l2cap::{SocketAddr, Stream};
    use bluer::{Address, AddressType};

    let MacAddr(a, b, c, d, e, f) = address;
    let target = SocketAddr::new(Address::new([a, b, c, d, e, f]), AddressType::BrEdr, SDP_PSM);

    match Stream::connect(target).await {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => true,
        Err(e) => {
            tracing::trace!(bt = %address, error = %e, "Bluetooth page failed");
            false
        }
    }
}

/// Pages `address` once. Always absent without Bluetooth support.
#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
pub async fn page(address: MacAddr) -> bool {
    tracing::trace!(bt = %address, "Bluetooth support not compiled in");
    false
}

/// Checks that a powered Bluetooth adapter is available.
///
/// # Errors
///
/// Returns [`GeofenceError::BluetoothUnavailable`] if BlueZ cannot be reached,
/// there is no adapter, or it is powered off.
#[cfg(feature = "bluetooth")]
pub async fn check_adapter() -> Result<()> {
    let unavailable = |e: bluer::Error| GeofenceError::BluetoothUnavailable(e.to_string());

    let session = bluer::Session::new().await.map_err(unavailable)?;
    let adapter = session.default_adapter().await.map_err(unavailable)?;
    if !adapter.is_powered().await.map_err(unavailable)? {
        return Err(GeofenceError::BluetoothUnavailable(format!(
            "adapter {} is powered off",
            adapter.name()
        )));
    }
    tracing::debug!(adapter = adapter.name(), "Bluetooth adapter ready");
    Ok(())
}

/// Checks that a powered Bluetooth adapter is available.
///
/// # Errors
///
/// Always fails: this build has no Bluetooth support.
#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
pub async fn check_adapter() -> Result<()> {
    Err(GeofenceError::BluetoothUnavailable(
        "built without the `bluetooth` feature".to_string(),
    ))
}
