//! Tunnel configuration.

use crate::error::{Result, TunnelError};
use crate::relay::RelayConfig;
use ipnet::Ipv4Net;
use nix::libc::IFNAMSIZ;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Default TUN device name.
pub const DEFAULT_DEVICE_NAME: &str = "tun_client";

/// Default address assigned to the TUN device.
pub const DEFAULT_ADDRESS: &str = "10.8.0.2/16";

/// Default MTU. Also the capacity of the packet buffers.
pub const DEFAULT_MTU: u16 = 1400;

/// Default Unix socket of the peer process.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/vm_port3";

/// Default peer address, routed through the device as a /32.
pub const DEFAULT_PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 191);

/// Default upper bound for a single read from the peer socket.
pub const DEFAULT_READ_QUANTUM: usize = 256;

/// Default sysctl mount point.
pub const DEFAULT_SYSCTL_ROOT: &str = "/proc/sys";

/// Smallest MTU an IPv4 interface may use.
pub const MIN_MTU: u16 = 68;

/// Log filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "mvirt_tunnel=info";

/// Runtime configuration of the tunnel client.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub device_name: String,
    pub address: Ipv4Net,
    pub mtu: u16,
    pub socket_path: PathBuf,
    pub peer: Ipv4Addr,
    pub read_quantum: usize,
    pub sysctl_root: PathBuf,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            address: DEFAULT_ADDRESS
                .parse()
                .expect("default address is a valid prefix"),
            mtu: DEFAULT_MTU,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            peer: DEFAULT_PEER,
            read_quantum: DEFAULT_READ_QUANTUM,
            sysctl_root: PathBuf::from(DEFAULT_SYSCTL_ROOT),
        }
    }
}

impl TunnelConfig {
    /// Check the configuration before any OS side effect happens.
    pub fn validate(&self) -> Result<()> {
        validate_device_name(&self.device_name)?;

        if self.mtu < MIN_MTU {
            return Err(TunnelError::InvalidConfig(format!(
                "MTU {} is below the IPv4 minimum of {MIN_MTU}",
                self.mtu
            )));
        }

        if self.read_quantum == 0 {
            return Err(TunnelError::InvalidConfig(
                "read quantum must be at least one byte".to_string(),
            ));
        }

        if self.read_quantum > usize::from(self.mtu) {
            return Err(TunnelError::InvalidConfig(format!(
                "read quantum {} exceeds MTU {}",
                self.read_quantum, self.mtu
            )));
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(TunnelError::InvalidConfig(
                "peer socket path is empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Buffer sizing for the relay loop.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            mtu: usize::from(self.mtu),
            read_quantum: self.read_quantum,
        }
    }
}

/// Interface names must fit `ifr_name` including the trailing NUL and must
/// be usable as a path component under `/proc/sys/net/ipv4/conf`.
pub fn validate_device_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TunnelError::InvalidConfig(
            "device name is empty".to_string(),
        ));
    }
    if name.len() >= IFNAMSIZ {
        return Err(TunnelError::InvalidConfig(format!(
            "device name '{name}' is too long (max {} bytes)",
            IFNAMSIZ - 1
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\0' || c.is_whitespace())
        || name == "."
        || name == ".."
    {
        return Err(TunnelError::InvalidConfig(format!(
            "device name '{name}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Log filter from `RUST_LOG`-style directives, or the default.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TunnelConfig::default();
        config.validate().unwrap();

        assert_eq!(config.device_name, "tun_client");
        assert_eq!(config.address, DEFAULT_ADDRESS.parse::<Ipv4Net>().unwrap());
        assert_eq!(config.mtu, 1400);
        assert_eq!(config.read_quantum, 256);
        assert_eq!(config.peer, Ipv4Addr::new(192, 168, 1, 191));
    }

    #[test]
    fn test_relay_config_mirrors_sizes() {
        let config = TunnelConfig {
            mtu: 9000,
            read_quantum: 4096,
            ..Default::default()
        };
        let relay = config.relay_config();
        assert_eq!(relay.mtu, 9000);
        assert_eq!(relay.read_quantum, 4096);
    }

    #[test]
    fn test_device_name_limits() {
        assert!(validate_device_name("tun0").is_ok());
        assert!(validate_device_name("abcdefghijklmno").is_ok()); // 15 bytes
        assert!(validate_device_name("abcdefghijklmnop").is_err()); // 16 bytes
        assert!(validate_device_name("").is_err());
        assert!(validate_device_name("tun/0").is_err());
        assert!(validate_device_name("tun 0").is_err());
        assert!(validate_device_name("..").is_err());
    }

    #[test]
    fn test_mtu_below_minimum_rejected() {
        let config = TunnelConfig {
            mtu: 67,
            read_quantum: 16,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TunnelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_read_quantum_bounds() {
        let zero = TunnelConfig {
            read_quantum: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let too_big = TunnelConfig {
            read_quantum: 1401,
            ..Default::default()
        };
        assert!(too_big.validate().is_err());

        let equal = TunnelConfig {
            read_quantum: 1400,
            ..Default::default()
        };
        assert!(equal.validate().is_ok());
    }

    fn relay_enabled(filter: EnvFilter) -> (bool, bool, bool) {
        use tracing::Level;
        use tracing_subscriber::layer::SubscriberExt;

        let subscriber = tracing_subscriber::registry().with(filter);
        tracing::subscriber::with_default(subscriber, || {
            (
                tracing::enabled!(target: "mvirt_tunnel::relay", Level::INFO),
                tracing::enabled!(target: "mvirt_tunnel::relay", Level::DEBUG),
                tracing::enabled!(target: "mvirt_tunnel::relay", Level::TRACE),
            )
        })
    }

    #[test]
    fn test_log_filter_defaults_to_info() {
        assert_eq!(relay_enabled(log_filter(None)), (true, false, false));
    }

    #[test]
    fn test_log_filter_honours_directives() {
        // Per-packet hex dumps are trace events of the relay
        let (_, _, trace) = relay_enabled(log_filter(Some("mvirt_tunnel=trace")));
        assert!(trace);

        let (_, debug, trace) = relay_enabled(log_filter(Some("debug")));
        assert!(debug);
        assert!(!trace);
    }

    #[test]
    fn test_log_filter_falls_back_on_invalid_directives() {
        assert_eq!(
            relay_enabled(log_filter(Some("mvirt_tunnel=loud"))),
            (true, false, false)
        );
    }
}
