//! Ownership scope for one tunnel run.
//!
//! A `Session` owns the device handle, the channel handle and the routing
//! state. `teardown` releases them in that order exactly once; `Drop` calls
//! it as well, so every exit path (relay error, shutdown, startup failure,
//! panic) ends with the same cleanup.

use crate::error::{Result, TunnelError};
use crate::packet::PacketIo;
use crate::relay::{Relay, RelayConfig, RelayStats, RelayStop};
use crate::route::RouteConfigurator;
use crate::shutdown::Shutdown;
use std::net::Ipv4Addr;
use tracing::{debug, info};

pub struct Session<D: PacketIo, C: PacketIo, R: RouteConfigurator> {
    interface: String,
    device: Option<D>,
    channel: Option<C>,
    routes: R,
    routes_applied: bool,
    torn_down: bool,
    stats: RelayStats,
}

impl<D: PacketIo, C: PacketIo, R: RouteConfigurator> Session<D, C, R> {
    /// Take ownership of an opened device and switch it to non-blocking mode.
    pub fn open(interface: impl Into<String>, device: D, routes: R) -> Result<Self> {
        let interface = interface.into();
        device
            .set_nonblocking()
            .map_err(|e| TunnelError::config(format!("{interface} non-blocking mode"), e))?;

        Ok(Self {
            interface,
            device: Some(device),
            channel: None,
            routes,
            routes_applied: false,
            torn_down: false,
            stats: RelayStats::default(),
        })
    }

    /// Apply host routing for the interface.
    ///
    /// Counts as applied even when it fails part-way, so teardown reverts
    /// whatever was installed.
    pub async fn apply_routes(&mut self, peer: Ipv4Addr) -> Result<()> {
        if self.device.is_none() {
            return Err(TunnelError::NotReady("device already released"));
        }
        self.routes_applied = true;
        self.routes.apply(&self.interface, peer).await
    }

    /// Take ownership of the connected channel and switch it to non-blocking mode.
    pub fn attach_channel(&mut self, channel: C) -> Result<()> {
        channel
            .set_nonblocking()
            .map_err(|e| TunnelError::config("peer channel non-blocking mode", e))?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Run the relay on the current thread until it stops.
    pub fn run(&mut self, config: RelayConfig, shutdown: &Shutdown) -> Result<RelayStop> {
        if self.torn_down {
            return Err(TunnelError::NotReady("session already torn down"));
        }
        let device = self
            .device
            .as_mut()
            .ok_or(TunnelError::NotReady("device not open"))?;
        let channel = self
            .channel
            .as_mut()
            .ok_or(TunnelError::NotReady("channel not attached"))?;

        let mut relay = Relay::new(config);
        let result = relay.run(device, channel, shutdown);
        self.stats = relay.stats();
        result
    }

    /// Release the device, then the channel, then revert routing. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            debug!(interface = %self.interface, "Teardown already done");
            return;
        }
        self.torn_down = true;

        info!(interface = %self.interface, "Tearing down tunnel");

        if let Some(device) = self.device.take() {
            device.close();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if self.routes_applied {
            self.routes.revert(&self.interface);
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Counters of the last relay run.
    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}

impl<D: PacketIo, C: PacketIo, R: RouteConfigurator> Drop for Session<D, C, R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::test_util::{
        DatagramDevice, EventLog, Recorded, RecordingRoutes, channel_pair, device_pair,
        ipv4_packet,
    };
    use std::io::Read;

    const CONFIG: RelayConfig = RelayConfig {
        mtu: 1400,
        read_quantum: 256,
    };

    type TestSession =
        Session<Recorded<DatagramDevice>, Recorded<Channel>, RecordingRoutes>;

    fn peer() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, 191)
    }

    #[tokio::test]
    async fn test_teardown_order() {
        let log = EventLog::new();
        let (device, _peer_device) = device_pair().unwrap();
        let (channel, _peer_channel) = channel_pair().unwrap();

        let mut session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::new(&log),
        )
        .unwrap();
        session.apply_routes(peer()).await.unwrap();
        session
            .attach_channel(Recorded::new("channel", channel, &log))
            .unwrap();

        session.teardown();

        assert_eq!(
            log.events(),
            vec![
                "device: nonblocking",
                "routes: apply tun_test 192.168.1.191",
                "channel: nonblocking",
                "device: closed",
                "channel: closed",
                "routes: revert tun_test",
            ]
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let log = EventLog::new();
        let (device, _peer_device) = device_pair().unwrap();
        let (channel, _peer_channel) = channel_pair().unwrap();

        let mut session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::new(&log),
        )
        .unwrap();
        session.apply_routes(peer()).await.unwrap();
        session
            .attach_channel(Recorded::new("channel", channel, &log))
            .unwrap();

        session.teardown();
        session.teardown();
        assert!(session.is_torn_down());
        drop(session);

        assert_eq!(log.count("device: closed"), 1);
        assert_eq!(log.count("channel: closed"), 1);
        assert_eq!(log.count("routes: revert tun_test"), 1);
    }

    #[test]
    fn test_drop_tears_down() {
        let log = EventLog::new();
        let (device, _peer_device) = device_pair().unwrap();

        let session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::new(&log),
        )
        .unwrap();
        drop(session);

        assert!(log.contains("device: closed"));
        // Routes were never applied, nothing to revert
        assert!(!log.contains("routes: revert tun_test"));
    }

    #[tokio::test]
    async fn test_failed_apply_is_still_reverted() {
        let log = EventLog::new();
        let (device, _peer_device) = device_pair().unwrap();

        let mut session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::failing(&log),
        )
        .unwrap();

        let err = session.apply_routes(peer()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Route { .. }));
        drop(session);

        assert_eq!(log.count("routes: revert tun_test"), 1);
    }

    #[test]
    fn test_run_requires_channel() {
        let log = EventLog::new();
        let (device, _peer_device) = device_pair().unwrap();
        let shutdown = Shutdown::new().unwrap();

        let mut session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::new(&log),
        )
        .unwrap();

        let err = session.run(CONFIG, &shutdown).unwrap_err();
        assert!(matches!(err, TunnelError::NotReady(_)));
    }

    #[test]
    fn test_run_after_teardown_rejected() {
        let log = EventLog::new();
        let (device, _peer_device) = device_pair().unwrap();
        let (channel, _peer_channel) = channel_pair().unwrap();
        let shutdown = Shutdown::new().unwrap();

        let mut session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::new(&log),
        )
        .unwrap();
        session
            .attach_channel(Recorded::new("channel", channel, &log))
            .unwrap();
        session.teardown();

        let err = session.run(CONFIG, &shutdown).unwrap_err();
        assert!(matches!(err, TunnelError::NotReady(_)));
    }

    #[test]
    fn test_run_relays_and_records_stats() {
        let log = EventLog::new();
        let (device, peer_device) = device_pair().unwrap();
        let (channel, mut peer_channel) = channel_pair().unwrap();
        let shutdown = Shutdown::new().unwrap();

        let mut session: TestSession = Session::open(
            "tun_test",
            Recorded::new("device", device, &log),
            RecordingRoutes::new(&log),
        )
        .unwrap();
        session
            .attach_channel(Recorded::new("channel", channel, &log))
            .unwrap();

        let packet = ipv4_packet(20);
        peer_device.send(&packet).unwrap();

        let trigger = shutdown.clone();
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 20];
            peer_channel.read_exact(&mut buf).unwrap();
            trigger.trigger();
            (buf, peer_channel)
        });

        let stop = session.run(CONFIG, &shutdown).unwrap();
        let (received, _peer_channel) = reader.join().unwrap();

        assert_eq!(stop, RelayStop::Shutdown);
        assert_eq!(&received[..], &packet[..]);
        assert_eq!(session.stats().to_channel_packets, 1);
    }
}
