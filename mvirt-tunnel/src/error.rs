//! Error types for the tunnel client.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can end the tunnel, either during startup or while relaying.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The TUN device could not be created or opened.
    #[error("failed to open TUN device '{name}': {source}")]
    Device {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A handle or the interface could not be put into the required mode.
    #[error("failed to configure {what}: {source}")]
    Config {
        what: String,
        #[source]
        source: io::Error,
    },

    /// The peer socket does not exist or refused the connection.
    #[error("failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Host routing or sysctl configuration failed.
    #[error("failed to apply routing ({step}): {source}")]
    Route {
        step: String,
        #[source]
        source: io::Error,
    },

    /// A read or write on the device or the channel failed.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The relay was started before the session was fully assembled.
    #[error("session not ready: {0}")]
    NotReady(&'static str),
}

impl TunnelError {
    pub(crate) fn config(what: impl Into<String>, source: io::Error) -> Self {
        TunnelError::Config {
            what: what.into(),
            source,
        }
    }

    pub(crate) fn route(step: impl Into<String>, source: io::Error) -> Self {
        TunnelError::Route {
            step: step.into(),
            source,
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        TunnelError::Io { op, source }
    }
}

/// Result type for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;
