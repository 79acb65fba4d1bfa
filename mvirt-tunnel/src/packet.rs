//! Packet endpoints and the IPv4-only forwarding policy.

use smoltcp::wire::{IpVersion, Ipv4Packet};
use std::fmt;
use std::io;
use std::os::fd::AsFd;

/// A handle that moves whole packets.
///
/// Implemented by the TUN device and the peer channel. The relay polls the
/// fd for readiness, so implementations must be switched to non-blocking
/// mode before the relay starts.
pub trait PacketIo: AsFd {
    /// Put the handle into non-blocking mode.
    fn set_nonblocking(&self) -> io::Result<()>;

    /// Read one packet into `buf`.
    ///
    /// Returns `ErrorKind::WouldBlock` when nothing is pending.
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one packet, returning the number of bytes accepted.
    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Release the handle. Taking `self` makes a second close impossible.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// What the relay does with a packet read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// IPv4: forward verbatim.
    Forward,
    /// Anything else, carrying the version nibble.
    Discard(u8),
    /// Nothing to inspect.
    Empty,
}

/// Classify a packet by the high nibble of its first byte.
pub fn classify(packet: &[u8]) -> Verdict {
    let Some(&first) = packet.first() else {
        return Verdict::Empty;
    };
    match IpVersion::of_packet(packet) {
        Ok(IpVersion::Ipv4) => Verdict::Forward,
        _ => Verdict::Discard(first >> 4),
    }
}

/// Source and destination of an IPv4 packet, if the header is complete.
pub fn ipv4_endpoints(packet: &[u8]) -> Option<(std::net::Ipv4Addr, std::net::Ipv4Addr)> {
    let ip = Ipv4Packet::new_checked(packet).ok()?;
    Some((ip.src_addr(), ip.dst_addr()))
}

/// Lowercase hex rendering of a byte slice for trace logs.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
