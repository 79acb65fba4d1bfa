//! Test harness for end-to-end tunnel runs
//!
//! Runs `establish` against socket-backed stand-ins for the TUN device and
//! the routing, while the test drives the kernel and peer ends from a plain
//! thread.

#![allow(dead_code, unused_imports)]

use mvirt_tunnel::RelayConfig;
use mvirt_tunnel::test_util::{EventLog, channel_pair, device_pair};
use std::net::Ipv4Addr;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::time::{Duration, Instant};

pub use mvirt_tunnel::test_util::{Recorded, RecordingRoutes, ipv4_packet, ipv6_packet};

pub const INTERFACE: &str = "tun_test";
pub const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 191);

pub const RELAY_CONFIG: RelayConfig = RelayConfig {
    mtu: 1400,
    read_quantum: 256,
};

/// Ends the test holds while the tunnel runs.
pub struct Ends {
    /// Kernel side of the TUN stand-in. Blocking.
    pub kernel: UnixDatagram,
    /// Peer process side of the channel. Blocking.
    pub peer: UnixStream,
}

/// Run a tunnel over stand-ins until it stops, driving the ends with `drive`
/// on a separate thread. Returns the outcome and what `drive` returned.
pub async fn run_tunnel<T, F>(
    log: &EventLog,
    drive: F,
) -> (mvirt_tunnel::Result<mvirt_tunnel::RelayStop>, T)
where
    T: Send + 'static,
    F: FnOnce(Ends) -> T + Send + 'static,
{
    let (device, kernel) = device_pair().expect("device pair");
    let (channel, peer) = channel_pair().expect("channel pair");

    let driver = std::thread::spawn(move || drive(Ends { kernel, peer }));

    let channel_log = log.clone();
    let result = mvirt_tunnel::lifecycle::establish(
        INTERFACE,
        Recorded::new("device", device, log),
        RecordingRoutes::new(log),
        PEER,
        move || Ok(Recorded::new("channel", channel, &channel_log)),
        RELAY_CONFIG,
    )
    .await;

    let driven = driver.join().expect("driver thread panicked");
    (result, driven)
}

/// Poll `log` until it contains `event`.
pub fn wait_for_event(log: &EventLog, event: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if log.contains(event) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
