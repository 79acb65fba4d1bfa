use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ipnet::Ipv4Net;
use mvirt_tunnel::config::{
    self, DEFAULT_ADDRESS, DEFAULT_DEVICE_NAME, DEFAULT_MTU, DEFAULT_PEER, DEFAULT_READ_QUANTUM,
    DEFAULT_SOCKET_PATH, DEFAULT_SYSCTL_ROOT,
};
use mvirt_tunnel::{RelayStop, TunnelConfig, TunnelError, exit_code};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mvirt-tunnel")]
#[command(about = "Point-to-point TUN client relaying IPv4 packets over a Unix socket")]
struct Args {
    /// TUN device to create
    #[arg(short, long, default_value = DEFAULT_DEVICE_NAME)]
    device: String,

    /// Address and prefix assigned to the device
    #[arg(short, long, default_value = DEFAULT_ADDRESS)]
    address: Ipv4Net,

    /// Device MTU, also the packet buffer size
    #[arg(short, long, default_value_t = DEFAULT_MTU)]
    mtu: u16,

    /// Unix stream socket of the peer process
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Peer address routed through the device as a host route
    #[arg(short, long, default_value_t = DEFAULT_PEER)]
    peer: Ipv4Addr,

    /// Upper bound in bytes for a single read from the peer socket
    #[arg(long, default_value_t = DEFAULT_READ_QUANTUM)]
    read_quantum: usize,

    /// Root of the sysctl tree
    #[arg(long, default_value = DEFAULT_SYSCTL_ROOT, hide = true)]
    sysctl_root: PathBuf,
}

impl From<Args> for TunnelConfig {
    fn from(args: Args) -> Self {
        TunnelConfig {
            device_name: args.device,
            address: args.address,
            mtu: args.mtu,
            socket_path: args.socket,
            peer: args.peer,
            read_quantum: args.read_quantum,
            sysctl_root: args.sysctl_root,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(config::log_filter(directives.as_deref()))
        .init();

    let config = TunnelConfig::from(Args::parse());
    let result = mvirt_tunnel::run(&config).await;

    match &result {
        Ok(RelayStop::Shutdown) => info!("Tunnel stopped"),
        Ok(RelayStop::PeerClosed) => warn!(
            socket = %config.socket_path.display(),
            "Peer closed the channel, tunnel stopped"
        ),
        Err(e @ TunnelError::Device { .. }) => {
            error!(error = %e, "Failed to create TUN device");
            error!("Do you have root privileges? Try running with 'sudo'.");
        }
        Err(e) => error!(error = %e, "Tunnel failed"),
    }

    ExitCode::from(exit_code(&result))
}
