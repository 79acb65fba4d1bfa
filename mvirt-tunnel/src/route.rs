//! Host routing for the tunnel interface.
//!
//! The client routes the peer address through the TUN device and relaxes
//! reverse-path filtering and local-source filtering on it, so packets for
//! addresses that are not assigned locally are still accepted.

use crate::error::{Result, TunnelError};
use crate::netlink::NetlinkHandle;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Applies and reverts the host routing state the tunnel needs.
///
/// `revert` is synchronous because it runs on the teardown path, which may
/// be a `Drop` on the relay thread.
#[allow(async_fn_in_trait)]
pub trait RouteConfigurator {
    /// Install the host route for `peer` and the interface sysctls.
    async fn apply(&mut self, interface: &str, peer: Ipv4Addr) -> Result<()>;

    /// Undo what `apply` did, after the interface handle was released.
    fn revert(&mut self, interface: &str);
}

/// Per-interface IPv4 sysctls written by [`KernelRoutes`].
pub const INTERFACE_SYSCTLS: [(&str, &str); 2] = [("rp_filter", "0"), ("accept_local", "1")];

/// Route configuration through netlink and `/proc/sys`.
pub struct KernelRoutes {
    sysctl_root: PathBuf,
}

impl KernelRoutes {
    pub fn new(sysctl_root: impl Into<PathBuf>) -> Self {
        Self {
            sysctl_root: sysctl_root.into(),
        }
    }

    /// Write the per-interface sysctls.
    pub fn relax_filters(&self, interface: &str) -> Result<()> {
        for (key, value) in INTERFACE_SYSCTLS {
            let path = interface_sysctl_path(&self.sysctl_root, interface, key);
            fs::write(&path, value)
                .map_err(|e| TunnelError::route(format!("{}={value}", path.display()), e))?;
            info!(path = %path.display(), value, "sysctl set");
        }
        Ok(())
    }
}

impl RouteConfigurator for KernelRoutes {
    async fn apply(&mut self, interface: &str, peer: Ipv4Addr) -> Result<()> {
        info!(interface, %peer, "Applying host routing");

        let netlink = NetlinkHandle::new().map_err(|e| TunnelError::route("netlink", e))?;
        let index = netlink
            .link_index(interface)
            .await
            .map_err(|e| TunnelError::route(format!("{interface} lookup"), e))?;

        let added = netlink
            .add_host_route_v4(index, peer)
            .await
            .map_err(|e| TunnelError::route(format!("route {peer}/32 dev {interface}"), e))?;
        if added {
            info!(%peer, interface, "Kernel route added");
        } else {
            warn!(%peer, interface, "Kernel route already exists");
        }

        self.relax_filters(interface)
    }

    fn revert(&mut self, interface: &str) {
        // Routes and per-interface sysctls disappear with the interface,
        // which the kernel deletes once the device handle is closed.
        debug!(interface, "Routing state released with the interface");
    }
}

/// `<root>/net/ipv4/conf/<interface>/<key>`
pub fn interface_sysctl_path(root: &Path, interface: &str, key: &str) -> PathBuf {
    root.join("net/ipv4/conf").join(interface).join(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn sysctl_dir(root: &Path, interface: &str) -> PathBuf {
        let dir = root.join("net/ipv4/conf").join(interface);
        fs::create_dir_all(&dir).unwrap();
        for (key, _) in INTERFACE_SYSCTLS {
            let default = if key == "rp_filter" { "1" } else { "0" };
            fs::write(dir.join(key), default).unwrap();
        }
        dir
    }

    #[test]
    fn test_sysctl_path() {
        let path = interface_sysctl_path(Path::new("/proc/sys"), "tun_client", "rp_filter");
        assert_eq!(
            path,
            PathBuf::from("/proc/sys/net/ipv4/conf/tun_client/rp_filter")
        );
    }

    #[test]
    fn test_relax_filters_writes_values() {
        let root = tempfile::tempdir().unwrap();
        let dir = sysctl_dir(root.path(), "tun_client");

        KernelRoutes::new(root.path())
            .relax_filters("tun_client")
            .unwrap();

        assert_eq!(fs::read_to_string(dir.join("rp_filter")).unwrap(), "0");
        assert_eq!(fs::read_to_string(dir.join("accept_local")).unwrap(), "1");
    }

    #[test]
    fn test_relax_filters_missing_interface() {
        let root = tempfile::tempdir().unwrap();

        let err = KernelRoutes::new(root.path())
            .relax_filters("tun_gone")
            .unwrap_err();
        match err {
            TunnelError::Route { step, source } => {
                assert!(step.contains("tun_gone/rp_filter"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_revert_leaves_sysctls_alone() {
        let root = tempfile::tempdir().unwrap();
        let dir = sysctl_dir(root.path(), "tun_client");
        let mut routes = KernelRoutes::new(root.path());

        routes.relax_filters("tun_client").unwrap();
        routes.revert("tun_client");

        assert_eq!(fs::read_to_string(dir.join("rp_filter")).unwrap(), "0");
    }
}
