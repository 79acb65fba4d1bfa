//! Termination signal handling.
//!
//! Handlers only request shutdown. Teardown happens on the relay thread once
//! the relay loop notices the request.

use crate::error::{Result, TunnelError};
use crate::shutdown::Shutdown;
use std::fmt;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Hangup,
    Interrupt,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Hangup => write!(f, "SIGHUP"),
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Install SIGHUP, SIGINT and SIGTERM handlers that trigger `shutdown`.
///
/// Must be called from within a tokio runtime. The returned task resolves to
/// the first signal received.
pub fn install(shutdown: Shutdown) -> Result<JoinHandle<TerminationSignal>> {
    let mut hangup =
        signal(SignalKind::hangup()).map_err(|e| TunnelError::config("SIGHUP handler", e))?;
    let mut interrupt =
        signal(SignalKind::interrupt()).map_err(|e| TunnelError::config("SIGINT handler", e))?;
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| TunnelError::config("SIGTERM handler", e))?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = hangup.recv() => TerminationSignal::Hangup,
            _ = interrupt.recv() => TerminationSignal::Interrupt,
            _ = terminate.recv() => TerminationSignal::Terminate,
        };
        info!(signal = %received, "Received termination signal, shutting down...");
        shutdown.trigger();
        received
    }))
}
