//! Startup ordering, relay thread and exit status.
//!
//! Startup runs in dependency order: open the device, configure it, take it
//! into a [`Session`] (non-blocking), apply routing, install signal handlers,
//! connect the channel (non-blocking). Only then does the relay start, on a
//! blocking thread that owns the session and tears it down when the relay
//! stops.

use crate::channel::Channel;
use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::packet::PacketIo;
use crate::relay::{RelayConfig, RelayStop};
use crate::route::{KernelRoutes, RouteConfigurator};
use crate::session::Session;
use crate::shutdown::Shutdown;
use crate::signals;
use crate::tun::TunDevice;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::info;

/// Run the tunnel client until shutdown, peer hang-up or failure.
pub async fn run(config: &TunnelConfig) -> Result<RelayStop> {
    config.validate()?;

    info!(
        device = %config.device_name,
        socket = %config.socket_path.display(),
        "Tunnel client starting"
    );

    let device = TunDevice::open(&config.device_name)?;
    device.configure(config.address, config.mtu).await?;

    let routes = KernelRoutes::new(&config.sysctl_root);
    let socket_path: PathBuf = config.socket_path.clone();

    establish(
        &config.device_name,
        device,
        routes,
        config.peer,
        move || Channel::connect(socket_path),
        config.relay_config(),
    )
    .await
}

/// Assemble a session from an opened device and relay until it stops.
///
/// The session is torn down on every path out of this function.
pub async fn establish<D, C, R, F>(
    interface: &str,
    device: D,
    routes: R,
    peer: Ipv4Addr,
    connect: F,
    relay_config: RelayConfig,
) -> Result<RelayStop>
where
    D: PacketIo + Send + 'static,
    C: PacketIo + Send + 'static,
    R: RouteConfigurator + Send + 'static,
    F: FnOnce() -> Result<C>,
{
    let mut session = Session::open(interface, device, routes)?;
    session.apply_routes(peer).await?;

    let shutdown =
        Shutdown::new().map_err(|e| TunnelError::config("shutdown eventfd", e))?;
    let signals = signals::install(shutdown.clone())?;

    let channel = connect()?;
    session.attach_channel(channel)?;

    let result = relay(session, relay_config, shutdown).await;
    signals.abort();
    result
}

/// Run the relay on a blocking thread, then tear the session down there.
pub async fn relay<D, C, R>(
    mut session: Session<D, C, R>,
    relay_config: RelayConfig,
    shutdown: Shutdown,
) -> Result<RelayStop>
where
    D: PacketIo + Send + 'static,
    C: PacketIo + Send + 'static,
    R: RouteConfigurator + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = session.run(relay_config, &shutdown);
        session.teardown();
        result
    })
    .await
    .map_err(|e| TunnelError::io("relay thread", io::Error::other(e)))?
}

/// Process exit status: zero only after a requested shutdown.
pub fn exit_code(result: &Result<RelayStop>) -> u8 {
    match result {
        Ok(RelayStop::Shutdown) => 0,
        Ok(RelayStop::PeerClosed) | Err(_) => 1,
    }
}
