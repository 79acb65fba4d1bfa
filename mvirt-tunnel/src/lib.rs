//! Point-to-point tunnel client.
//!
//! Creates a TUN device, routes a single peer address through it and relays
//! IPv4 packets between the device and a Unix stream socket owned by a peer
//! process.

pub mod channel;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod netlink;
pub mod packet;
pub mod relay;
pub mod route;
pub mod session;
pub mod shutdown;
pub mod signals;
pub mod test_util;
pub mod tun;

pub use config::TunnelConfig;
pub use error::{Result, TunnelError};
pub use lifecycle::{exit_code, run};
pub use relay::{RelayConfig, RelayStats, RelayStop};
