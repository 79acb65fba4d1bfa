//! Netlink interface for link, address and route configuration.

use futures::TryStreamExt;
use netlink_packet_route::route::RouteProtocol;
use nix::libc;
use rtnetlink::Handle;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// Handle for netlink operations.
pub struct NetlinkHandle {
    handle: Handle,
}

impl NetlinkHandle {
    /// Open a netlink connection and drive it on the current runtime.
    pub fn new() -> io::Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Look up the interface index of `name`.
    pub async fn link_index(&self, name: &str) -> io::Result<u32> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(link)) => Ok(link.header.index),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("interface {name} not found"),
            )),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    pub async fn set_mtu(&self, index: u32, mtu: u32) -> io::Result<()> {
        self.handle
            .link()
            .set(index)
            .mtu(mtu)
            .execute()
            .await
            .map_err(io::Error::other)
    }

    /// Bring a link administratively up.
    pub async fn set_up(&self, index: u32) -> io::Result<()> {
        self.handle
            .link()
            .set(index)
            .up()
            .execute()
            .await
            .map_err(io::Error::other)
    }

    /// Add an IPv4 address. An address that is already present is not an error.
    pub async fn add_address_v4(
        &self,
        index: u32,
        addr: Ipv4Addr,
        prefix_len: u8,
    ) -> io::Result<bool> {
        match self
            .handle
            .address()
            .add(index, IpAddr::V4(addr), prefix_len)
            .execute()
            .await
        {
            Ok(()) => Ok(true),
            Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::EEXIST => Ok(false),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    /// Add a static host route (/32) for `dest` through the interface.
    ///
    /// Returns `false` if the route already existed.
    pub async fn add_host_route_v4(&self, index: u32, dest: Ipv4Addr) -> io::Result<bool> {
        match self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(dest, 32)
            .output_interface(index)
            .protocol(RouteProtocol::Static)
            .execute()
            .await
        {
            Ok(()) => Ok(true),
            Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::EEXIST => Ok(false),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}
