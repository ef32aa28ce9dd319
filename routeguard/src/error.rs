// Error taxonomy shared by every RouteGuard component

//! Error types
//!
//! Every fallible library operation returns [`RouteGuardError`]. Configuration,
//! resolution and dependency errors are raised before any firewall mutation,
//! so a failed start never leaves a partial ruleset behind.

use thiserror::Error;

/// Errors produced by RouteGuard core operations
#[derive(Debug, Error)]
pub enum RouteGuardError {
    /// Malformed or incomplete WireGuard file, no peers, no endpoints
    #[error("{0}")]
    Config(String),

    /// Peer endpoint string that is neither `host:port` nor `[v6]:port`
    #[error("invalid endpoint format: {0}")]
    EndpointFormat(String),

    /// Endpoint host could not be resolved to any address
    #[error("cannot resolve endpoint host '{host}': {reason}")]
    Resolution {
        /// Host part of the endpoint
        host: String,
        /// Resolver error text
        reason: String,
    },

    /// Required external command is missing
    #[error("{0}")]
    Dependency(String),

    /// Not running with the privileges needed to touch the firewall
    #[error("please run as root (sudo)")]
    Privilege,

    /// Tunnel interface never appeared within the wait budget
    #[error("VPN interface '{iface}' not found after {timeout_secs}s")]
    InterfaceTimeout {
        /// Interface that was waited for
        iface: String,
        /// Wait budget in seconds
        timeout_secs: u64,
    },

    /// Ruleset submission or post-apply verification failed
    #[error("{0}")]
    FirewallApply(String),

    /// Tunnel bring-up or bring-down failed
    #[error("{0}")]
    Tunnel(String),

    /// Runtime state record could not be written
    #[error("state file: {0}")]
    State(String),

    /// Unexpected I/O failure (process spawn, pipe)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RouteGuardError>;
