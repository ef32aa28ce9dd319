// RouteGuard library
// Shared modules for the CLI and tests

#![warn(missing_docs)]

//! RouteGuard: a WireGuard kill switch with a route-leak monitor
//!
//! The library turns a WireGuard configuration into a [`types::PolicyModel`],
//! renders it into an nftables ruleset, and drives the monitor/protect
//! lifecycle around an existing tunnel.
//!
//! # Main Components
//!
//! - [`wg_config`] and [`endpoint`]: WireGuard file parsing and peer resolution
//! - [`policy`]: policy construction from a WireGuard file
//! - [`ruleset`] and [`firewall`]: nftables script rendering and installation
//! - [`leak`]: routing-table scan for routes that bypass the tunnel
//! - [`tunnel`]: `wg-quick` control and interface presence checks
//! - [`runner`]: lifecycle runner, stop handle and worker thread
//! - [`state_file`] and [`status`]: runtime record and status reporting
//! - [`settings`]: optional TOML settings file

pub mod endpoint;
pub mod error;
pub mod executor;
pub mod firewall;
pub mod leak;
pub mod policy;
pub mod ruleset;
pub mod runner;
pub mod settings;
pub mod state_file;
pub mod status;
pub mod tunnel;
pub mod types;
pub mod wg_config;
