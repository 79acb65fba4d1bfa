//! TUN device for the client side of the tunnel
//!
//! Creates a Layer 3 TUN device (raw IP packets, no packet information
//! header). The device is not made persistent: the kernel deletes the
//! interface, together with its addresses and routes, when the last handle
//! is closed.

use crate::config::validate_device_name;
use crate::error::{Result, TunnelError};
use crate::netlink::NetlinkHandle;
use crate::packet::PacketIo;
use ipnet::Ipv4Net;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use tracing::{debug, info};

/// TUN device flags from linux/if_tun.h
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

/// ioctl request code for TUNSETIFF
const TUNSETIFF: libc::c_ulong = 0x400454ca;

/// ifreq structure for TUN device configuration
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

impl IfReq {
    fn new(name: &str, flags: libc::c_short) -> Self {
        let mut ifr = IfReq {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: flags,
            _pad: [0; 22],
        };
        for (i, &b) in name.as_bytes().iter().enumerate() {
            ifr.ifr_name[i] = b as libc::c_char;
        }
        ifr
    }
}

pub struct TunDevice {
    name: String,
    file: File,
}

impl TunDevice {
    /// Create the TUN device `name` and return a handle to it.
    pub fn open(name: &str) -> Result<Self> {
        validate_device_name(name).map_err(|e| TunnelError::Device {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?;

        info!(name, "Creating TUN device");

        let device_err = |source| TunnelError::Device {
            name: name.to_string(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(device_err)?;

        let ifr = IfReq::new(name, IFF_TUN | IFF_NO_PI);
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &ifr) };
        if ret < 0 {
            return Err(device_err(io::Error::last_os_error()));
        }

        info!(name, "TUN device created");

        Ok(Self {
            name: name.to_string(),
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assign the address, set the MTU and bring the link up.
    ///
    /// An address that is already assigned is accepted, so the call can be
    /// repeated on the same device.
    pub async fn configure(&self, address: Ipv4Net, mtu: u16) -> Result<()> {
        let netlink = NetlinkHandle::new().map_err(|e| TunnelError::config("netlink", e))?;

        let index = netlink
            .link_index(&self.name)
            .await
            .map_err(|e| TunnelError::config(format!("{} lookup", self.name), e))?;

        netlink
            .set_mtu(index, u32::from(mtu))
            .await
            .map_err(|e| TunnelError::config(format!("{} MTU", self.name), e))?;

        let added = netlink
            .add_address_v4(index, address.addr(), address.prefix_len())
            .await
            .map_err(|e| TunnelError::config(format!("{} address", self.name), e))?;
        if !added {
            debug!(name = %self.name, %address, "Address already assigned");
        }

        netlink
            .set_up(index)
            .await
            .map_err(|e| TunnelError::config(format!("{} link up", self.name), e))?;

        info!(name = %self.name, if_index = index, %address, mtu, "TUN device configured");
        Ok(())
    }
}

impl PacketIo for TunDevice {
    fn set_nonblocking(&self) -> io::Result<()> {
        let flags = fcntl(&self.file, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let new_flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(&self.file, FcntlArg::F_SETFL(new_flags)).map_err(io::Error::from)?;
        Ok(())
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }
}

impl AsFd for TunDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        debug!(name = %self.name, "TUN device closed");
    }
}
