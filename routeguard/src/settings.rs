// Settings file parser

//! Settings file parsing and validation
//!
//! Loads the optional TOML settings file that supplies defaults for command
//! line flags, logging and state file locations.

use crate::state_file::{RUN_STATE_FILE, TMP_STATE_FILE};
use crate::types::{Mode, DEFAULT_POLL_INTERVAL_SECS};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default settings file location
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/routeguard/config.toml";

/// Main settings structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// `[general]` section
    #[serde(default)]
    pub general: GeneralSettings,
    /// `[state]` section
    #[serde(default)]
    pub state: StateSettings,
}

/// General settings
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GeneralSettings {
    /// env_logger default filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Mode used when `--mode` is not given
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Seconds between monitor cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Exempt private LAN ranges by default
    #[serde(default = "default_true")]
    pub allow_lan: bool,
    /// Exempt DHCP client traffic by default
    #[serde(default = "default_true")]
    pub allow_dhcp: bool,
    /// Seconds to wait for the tunnel device in protect mode
    #[serde(default = "default_interface_timeout")]
    pub interface_timeout: u64,
    /// Remove the managed table on teardown (protect mode)
    #[serde(default = "default_true")]
    pub cleanup_on_exit: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            mode: default_mode(),
            poll_interval: default_poll_interval(),
            allow_lan: true,
            allow_dhcp: true,
            interface_timeout: default_interface_timeout(),
            cleanup_on_exit: true,
        }
    }
}

/// State file locations
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StateSettings {
    /// Candidate state file paths, tried in order
    #[serde(default = "default_state_paths")]
    pub paths: Vec<PathBuf>,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            paths: default_state_paths(),
        }
    }
}

// Default values for settings
fn default_log_level() -> String {
    "info".to_string()
}

fn default_mode() -> Mode {
    Mode::Monitor
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_interface_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_state_paths() -> Vec<PathBuf> {
    vec![PathBuf::from(RUN_STATE_FILE), PathBuf::from(TMP_STATE_FILE)]
}

/// Load settings from a TOML file
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let contents = fs::read_to_string(path.as_ref()).context("Failed to read settings file")?;

    let settings: Settings = toml::from_str(&contents).context("Failed to parse settings file")?;

    validate_settings(&settings)?;
    Ok(settings)
}

/// Load settings, treating a missing file as "use defaults"
///
/// Only the implicit default location may be absent; an explicitly named
/// file must exist.
pub fn load_settings_or_default(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => load_settings(path),
        None => {
            let default = Path::new(DEFAULT_SETTINGS_PATH);
            if default.exists() {
                load_settings(default)
            } else {
                Ok(Settings::default())
            }
        }
    }
}

/// Validate settings values
fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.general.log_level.trim().is_empty() {
        anyhow::bail!("log_level cannot be empty");
    }

    if settings.general.poll_interval == 0 {
        anyhow::bail!("poll_interval must be > 0");
    }

    if settings.general.interface_timeout == 0 {
        anyhow::bail!("interface_timeout must be > 0");
    }

    if settings.state.paths.is_empty() {
        anyhow::bail!("state.paths cannot be empty");
    }

    Ok(())
}
