//! Test utilities: unprivileged stand-ins for the TUN device, the peer
//! channel and the host routing.
//!
//! A `UnixDatagram` socket pair keeps packet boundaries the way a TUN device
//! does, so it replaces the device; the channel is a real `UnixStream` pair.

use crate::channel::Channel;
use crate::error::{Result, TunnelError};
use crate::packet::PacketIo;
use crate::route::RouteConfigurator;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::sync::{Arc, Mutex};

/// Packet device backed by one end of a datagram socket pair.
pub struct DatagramDevice {
    socket: UnixDatagram,
}

impl PacketIo for DatagramDevice {
    fn set_nonblocking(&self) -> io::Result<()> {
        self.socket.set_nonblocking(true)
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }
}

impl AsFd for DatagramDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

/// Device plus the "kernel" end that injects and receives packets.
///
/// The device is non-blocking; the peer end stays blocking.
pub fn device_pair() -> io::Result<(DatagramDevice, UnixDatagram)> {
    let (a, b) = UnixDatagram::pair()?;
    let device = DatagramDevice { socket: a };
    device.set_nonblocking()?;
    Ok((device, b))
}

/// Non-blocking channel plus the peer end.
pub fn channel_pair() -> io::Result<(Channel, UnixStream)> {
    let (a, b) = UnixStream::pair()?;
    let channel = Channel::from_stream(a, "socketpair");
    channel.set_nonblocking()?;
    Ok((channel, b))
}

/// Channel whose reads always fail with `ConnectionReset`.
pub struct FailingChannel {
    stream: UnixStream,
}

impl FailingChannel {
    pub fn pair() -> io::Result<(Self, UnixStream)> {
        let (a, b) = UnixStream::pair()?;
        a.set_nonblocking(true)?;
        Ok((Self { stream: a }, b))
    }
}

impl PacketIo for FailingChannel {
    fn set_nonblocking(&self) -> io::Result<()> {
        self.stream.set_nonblocking(true)
    }

    fn read_packet(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::ConnectionReset))
    }

    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

impl AsFd for FailingChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Outcome injected into a [`Faulty`] handle's writes.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fail with this error kind (`WouldBlock` included).
    Error(io::ErrorKind),
    /// Report only this many bytes as written.
    Short(usize),
}

/// Wraps a packet handle and replaces its reads or writes with failures.
///
/// Readiness still comes from the wrapped fd, so the relay wakes up exactly
/// as it would for the real handle.
pub struct Faulty<T: PacketIo> {
    inner: T,
    read_fault: Option<io::ErrorKind>,
    write_fault: Option<Fault>,
}

impl<T: PacketIo> Faulty<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            read_fault: None,
            write_fault: None,
        }
    }

    pub fn fail_reads(mut self, kind: io::ErrorKind) -> Self {
        self.read_fault = Some(kind);
        self
    }

    pub fn fail_writes(mut self, fault: Fault) -> Self {
        self.write_fault = Some(fault);
        self
    }
}

impl<T: PacketIo> PacketIo for Faulty<T> {
    fn set_nonblocking(&self) -> io::Result<()> {
        self.inner.set_nonblocking()
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_fault {
            Some(kind) => Err(io::Error::from(kind)),
            None => self.inner.read_packet(buf),
        }
    }

    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.write_fault {
            Some(Fault::Error(kind)) => Err(io::Error::from(kind)),
            Some(Fault::Short(n)) => Ok(n.min(buf.len())),
            None => self.inner.write_packet(buf),
        }
    }
}

impl<T: PacketIo> AsFd for Faulty<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

/// Ordered record of lifecycle events, shared between mocks.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.count(event) > 0
    }
}

/// Wraps a packet handle and records mode changes and release.
pub struct Recorded<T: PacketIo> {
    label: &'static str,
    inner: T,
    log: EventLog,
}

impl<T: PacketIo> Recorded<T> {
    pub fn new(label: &'static str, inner: T, log: &EventLog) -> Self {
        Self {
            label,
            inner,
            log: log.clone(),
        }
    }
}

impl<T: PacketIo> PacketIo for Recorded<T> {
    fn set_nonblocking(&self) -> io::Result<()> {
        self.log.push(format!("{}: nonblocking", self.label));
        self.inner.set_nonblocking()
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_packet(buf)
    }

    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_packet(buf)
    }
}

impl<T: PacketIo> AsFd for Recorded<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl<T: PacketIo> Drop for Recorded<T> {
    fn drop(&mut self) {
        self.log.push(format!("{}: closed", self.label));
    }
}

/// Route configurator that only records calls.
pub struct RecordingRoutes {
    log: EventLog,
    fail_apply: bool,
}

impl RecordingRoutes {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            fail_apply: false,
        }
    }

    /// Make `apply` fail with a `Route` error after recording the call.
    pub fn failing(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            fail_apply: true,
        }
    }
}

impl RouteConfigurator for RecordingRoutes {
    async fn apply(&mut self, interface: &str, peer: Ipv4Addr) -> Result<()> {
        self.log.push(format!("routes: apply {interface} {peer}"));
        if self.fail_apply {
            return Err(TunnelError::Route {
                step: format!("route {peer}/32 dev {interface}"),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        Ok(())
    }

    fn revert(&mut self, interface: &str) {
        self.log.push(format!("routes: revert {interface}"));
    }
}

/// IPv4-looking packet of `len` bytes (at least one).
pub fn ipv4_packet(len: usize) -> Vec<u8> {
    let mut packet: Vec<u8> = (0..len.max(1)).map(|i| i as u8).collect();
    packet[0] = 0x45;
    packet
}

/// IPv6-looking packet of `len` bytes (at least one).
pub fn ipv6_packet(len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; len.max(1)];
    packet[0] = 0x60;
    packet
}
