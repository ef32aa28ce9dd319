// WireGuard configuration file parser

//! WireGuard configuration file parsing
//!
//! Reads the INI-like `.conf` format: `[Interface]` and `[Peer]` sections of
//! `key = value` lines. Unknown sections are parsed but discarded.

use crate::error::{Result, RouteGuardError};
use crate::types::RawWireGuardConfig;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Section currently receiving `key = value` lines
enum Section {
    Interface,
    Peer,
    Ignored,
}

/// Load and parse a WireGuard config file
///
/// # Errors
///
/// Returns [`RouteGuardError::Config`] if the file cannot be read or contains
/// no `[Peer]` section.
pub fn load_wireguard_config<P: AsRef<Path>>(path: P) -> Result<RawWireGuardConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RouteGuardError::Config(format!(
            "WireGuard config not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        RouteGuardError::Config(format!(
            "Failed to read WireGuard config {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_wireguard_config(&contents)
}

/// Parse WireGuard config text into interface and peer sections
pub fn parse_wireguard_config(contents: &str) -> Result<RawWireGuardConfig> {
    let mut config = RawWireGuardConfig::default();
    let mut section = Section::Ignored;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = match name.trim().to_ascii_lowercase().as_str() {
                "interface" => Section::Interface,
                "peer" => {
                    config.peers.push(BTreeMap::new());
                    Section::Peer
                }
                _ => Section::Ignored,
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim().to_string(), value.trim().to_string());

        match section {
            Section::Interface => {
                config.interface.insert(key, value);
            }
            Section::Peer => {
                if let Some(peer) = config.peers.last_mut() {
                    peer.insert(key, value);
                }
            }
            Section::Ignored => {}
        }
    }

    if config.peers.is_empty() {
        return Err(RouteGuardError::Config(
            "No [Peer] section found in WireGuard config.".to_string(),
        ));
    }

    Ok(config)
}

/// Derive the tunnel interface name from the config file name (`wg0.conf` -> `wg0`)
pub fn infer_iface_name<P: AsRef<Path>>(path: P) -> String {
    let name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match name.strip_suffix(".conf") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}
