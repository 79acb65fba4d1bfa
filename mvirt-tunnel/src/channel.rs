//! Unix stream connection to the peer process.

use crate::error::{Result, TunnelError};
use crate::packet::PacketIo;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Connected byte stream to the peer. Packets are written as-is, one write
/// per packet, without a length prefix.
pub struct Channel {
    path: PathBuf,
    stream: UnixStream,
}

impl Channel {
    /// Connect to the peer listening on `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TunnelError::Connect {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "Connected to peer");

        Ok(Self {
            path: path.to_path_buf(),
            stream,
        })
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PacketIo for Channel {
    fn set_nonblocking(&self) -> io::Result<()> {
        self.stream.set_nonblocking(true)
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }
}

impl AsFd for Channel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Peer channel closed");
    }
}
