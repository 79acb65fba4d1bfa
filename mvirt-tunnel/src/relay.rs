//! Relay loop between the TUN device and the peer channel
//!
//! Each iteration waits until the device, the channel or the shutdown token
//! is readable, then:
//! 1. moves one packet device -> channel if the device was ready (IPv4 only,
//!    other versions are discarded),
//! 2. reads the channel once without blocking, at most `read_quantum`
//!    bytes, and writes what it got to the device.
//!
//! Any I/O failure ends the loop. There is no retry and no reconnect.

use crate::error::{Result, TunnelError};
use crate::packet::{HexDump, PacketIo, Verdict, classify, ipv4_endpoints};
use crate::shutdown::Shutdown;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io;
use std::os::fd::AsFd;
use tracing::{debug, info, trace, warn};

/// Buffer sizing for the relay.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Device MTU; capacity of both packet buffers.
    pub mtu: usize,
    /// Upper bound for a single channel read.
    pub read_quantum: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Running,
    Stopping,
}

/// Why the relay stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStop {
    /// Shutdown was requested, normally by a termination signal.
    Shutdown,
    /// The peer closed its end of the channel.
    PeerClosed,
}

/// Packet counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub to_channel_packets: u64,
    pub to_channel_bytes: u64,
    pub to_device_packets: u64,
    pub to_device_bytes: u64,
    /// Non-IPv4 or empty packets read from the device.
    pub discarded: u64,
    /// Packets lost because the destination would have blocked.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Readiness {
    device: bool,
    channel: bool,
    shutdown: bool,
}

pub struct Relay {
    config: RelayConfig,
    /// From-device and to-device bytes.
    device_buf: Vec<u8>,
    /// To-channel and from-channel bytes.
    channel_buf: Vec<u8>,
    state: RelayState,
    stats: RelayStats,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let mtu = config.mtu.max(1);
        let config = RelayConfig {
            mtu,
            read_quantum: config.read_quantum.clamp(1, mtu),
        };
        Self {
            config,
            device_buf: vec![0; config.mtu],
            channel_buf: vec![0; config.mtu],
            state: RelayState::Running,
            stats: RelayStats::default(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Relay until shutdown, peer hang-up or the first I/O error.
    ///
    /// Both handles must already be in non-blocking mode.
    pub fn run<D, C>(
        &mut self,
        device: &mut D,
        channel: &mut C,
        shutdown: &Shutdown,
    ) -> Result<RelayStop>
    where
        D: PacketIo,
        C: PacketIo,
    {
        info!(
            mtu = self.config.mtu,
            read_quantum = self.config.read_quantum,
            "Relay started"
        );

        let result = loop {
            match self.iterate(device, channel, shutdown) {
                Ok(None) => continue,
                Ok(Some(stop)) => break Ok(stop),
                Err(e) => break Err(e),
            }
        };
        self.state = RelayState::Stopping;

        info!(
            to_channel = self.stats.to_channel_packets,
            to_device = self.stats.to_device_packets,
            discarded = self.stats.discarded,
            dropped = self.stats.dropped,
            "Relay stopped"
        );
        result
    }

    /// One pass of the loop. `Ok(None)` means keep running.
    fn iterate<D, C>(
        &mut self,
        device: &mut D,
        channel: &mut C,
        shutdown: &Shutdown,
    ) -> Result<Option<RelayStop>>
    where
        D: PacketIo,
        C: PacketIo,
    {
        if self.state == RelayState::Stopping || shutdown.is_triggered() {
            return Ok(Some(RelayStop::Shutdown));
        }

        let ready = wait(device, channel, shutdown)?;
        if ready.shutdown {
            debug!("Shutdown requested, leaving relay loop");
            return Ok(Some(RelayStop::Shutdown));
        }

        if ready.device {
            self.device_to_channel(device, channel)?;
        } else {
            trace!(channel_ready = ready.channel, "Device not ready");
        }

        self.channel_to_device(channel, device)
    }

    fn device_to_channel<D, C>(&mut self, device: &mut D, channel: &mut C) -> Result<()>
    where
        D: PacketIo,
        C: PacketIo,
    {
        let len = match device.read_packet(&mut self.device_buf) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(()),
            Err(e) => return Err(TunnelError::io("read from TUN device", e)),
        };

        let packet = &self.device_buf[..len];
        match classify(packet) {
            Verdict::Forward => {}
            Verdict::Discard(version) => {
                debug!(version, len, "Ignoring non-IPv4 packet");
                self.stats.discarded += 1;
                return Ok(());
            }
            Verdict::Empty => {
                debug!("Ignoring empty read from TUN device");
                self.stats.discarded += 1;
                return Ok(());
            }
        }

        self.channel_buf[..len].copy_from_slice(packet);
        let out = &self.channel_buf[..len];

        match channel.write_packet(out) {
            Ok(n) if n == len => {
                self.stats.to_channel_packets += 1;
                self.stats.to_channel_bytes += len as u64;
                if let Some((src, dst)) = ipv4_endpoints(out) {
                    trace!(len, %src, %dst, packet = %HexDump(out), "device -> channel");
                } else {
                    trace!(len, packet = %HexDump(out), "device -> channel");
                }
                Ok(())
            }
            Ok(n) => Err(TunnelError::io("write to channel", short_write(n, len))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(len, "Channel not writable, dropping packet");
                self.stats.dropped += 1;
                Ok(())
            }
            Err(e) => Err(TunnelError::io("write to channel", e)),
        }
    }

    fn channel_to_device<C, D>(
        &mut self,
        channel: &mut C,
        device: &mut D,
    ) -> Result<Option<RelayStop>>
    where
        C: PacketIo,
        D: PacketIo,
    {
        let quantum = self.config.read_quantum;
        let len = match channel.read_packet(&mut self.channel_buf[..quantum]) {
            Ok(0) => {
                warn!("Peer closed the channel");
                return Ok(Some(RelayStop::PeerClosed));
            }
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Ok(None),
            Err(e) => return Err(TunnelError::io("read from channel", e)),
        };

        self.device_buf[..len].copy_from_slice(&self.channel_buf[..len]);
        let out = &self.device_buf[..len];

        match device.write_packet(out) {
            Ok(n) if n == len => {
                self.stats.to_device_packets += 1;
                self.stats.to_device_bytes += len as u64;
                trace!(len, packet = %HexDump(out), "channel -> device");
                Ok(None)
            }
            Ok(n) => Err(TunnelError::io("write to TUN device", short_write(n, len))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(len, "TUN device not writable, dropping packet");
                self.stats.dropped += 1;
                Ok(None)
            }
            Err(e) => Err(TunnelError::io("write to TUN device", e)),
        }
    }
}

/// Block until one of the three fds is readable. No timeout.
fn wait(device: &impl AsFd, channel: &impl AsFd, shutdown: &Shutdown) -> Result<Readiness> {
    let mut fds = [
        PollFd::new(device.as_fd(), PollFlags::POLLIN),
        PollFd::new(channel.as_fd(), PollFlags::POLLIN),
        PollFd::new(shutdown.as_fd(), PollFlags::POLLIN),
    ];

    loop {
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(TunnelError::io("readiness wait", io::Error::from(e))),
        }
    }

    // Errors and hang-ups count as ready so the following read reports them
    let ready = |fd: &PollFd| {
        fd.revents().is_some_and(|r| {
            r.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
        })
    };

    Ok(Readiness {
        device: ready(&fds[0]),
        channel: ready(&fds[1]),
        shutdown: ready(&fds[2]),
    })
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn short_write(written: usize, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::WriteZero,
        format!("short write: {written} of {len} bytes"),
    )
}
