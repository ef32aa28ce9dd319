// Shared types for the kill switch

//! Shared data structures
//!
//! This module defines the value types passed between components: the
//! operating [`Mode`], a single [`EndpointRule`], the validated and immutable
//! [`PolicyModel`], the transient [`RawWireGuardConfig`] and the persisted
//! [`RuntimeState`] record.

use crate::error::{Result, RouteGuardError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Default seconds between two monitor cycles
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Operating mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Watch routes only, never touch the firewall
    Monitor,
    /// Apply the kill switch and watch routes
    Protect,
    /// Remove any kill switch and exit
    Off,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Monitor => "monitor",
            Mode::Protect => "protect",
            Mode::Off => "off",
        };
        f.write_str(s)
    }
}

/// Transport protocol of an endpoint rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    /// UDP
    Udp,
    /// TCP
    Tcp,
}

impl Proto {
    /// Keyword used in nftables match expressions
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Udp => "udp",
            Proto::Tcp => "tcp",
        }
    }
}

/// A destination exempted from the drop policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRule {
    /// Destination address
    pub ip: IpAddr,
    /// Destination port
    pub port: u16,
    /// Transport protocol
    pub proto: Proto,
}

impl EndpointRule {
    /// WireGuard endpoints are always UDP
    pub fn udp(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            proto: Proto::Udp,
        }
    }
}

impl fmt::Display for EndpointRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.port, self.proto.as_str())
    }
}

/// Validated, immutable policy for one run
///
/// Construction goes through [`PolicyModel::new`], which enforces a non-empty
/// tunnel name and a non-empty endpoint set. Endpoints keep insertion order
/// and never contain duplicates, so compiling the same model always yields
/// the same ruleset text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyRecord")]
pub struct PolicyModel {
    mode: Mode,
    vpn_iface: String,
    poll_interval_sec: u64,
    allow_lan: bool,
    allow_dhcp: bool,
    vpn_endpoints: Vec<EndpointRule>,
}

/// Unvalidated wire form of [`PolicyModel`]
#[derive(Deserialize)]
struct PolicyRecord {
    mode: Mode,
    vpn_iface: String,
    poll_interval_sec: u64,
    allow_lan: bool,
    allow_dhcp: bool,
    vpn_endpoints: Vec<EndpointRule>,
}

impl TryFrom<PolicyRecord> for PolicyModel {
    type Error = RouteGuardError;

    fn try_from(r: PolicyRecord) -> Result<Self> {
        PolicyModel::new(
            r.mode,
            r.vpn_iface,
            r.poll_interval_sec,
            r.allow_lan,
            r.allow_dhcp,
            r.vpn_endpoints,
        )
    }
}

impl PolicyModel {
    /// Build a validated policy
    ///
    /// # Errors
    ///
    /// Returns [`RouteGuardError::Config`] if the interface name is empty or
    /// no endpoints remain after deduplication. The poll interval is clamped
    /// to at least one second.
    pub fn new(
        mode: Mode,
        vpn_iface: String,
        poll_interval_sec: u64,
        allow_lan: bool,
        allow_dhcp: bool,
        endpoints: impl IntoIterator<Item = EndpointRule>,
    ) -> Result<Self> {
        if vpn_iface.trim().is_empty() {
            return Err(RouteGuardError::Config(
                "VPN interface name cannot be empty".to_string(),
            ));
        }

        let mut vpn_endpoints: Vec<EndpointRule> = Vec::new();
        for ep in endpoints {
            if !vpn_endpoints.contains(&ep) {
                vpn_endpoints.push(ep);
            }
        }
        if vpn_endpoints.is_empty() {
            return Err(RouteGuardError::Config(
                "No Peer Endpoint found in WireGuard config.".to_string(),
            ));
        }

        Ok(Self {
            mode,
            vpn_iface,
            poll_interval_sec: poll_interval_sec.max(1),
            allow_lan,
            allow_dhcp,
            vpn_endpoints,
        })
    }

    /// Operating mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Tunnel interface name
    pub fn vpn_iface(&self) -> &str {
        &self.vpn_iface
    }

    /// Seconds between monitor cycles, at least 1
    pub fn poll_interval_sec(&self) -> u64 {
        self.poll_interval_sec
    }

    /// Whether private LAN ranges are exempted
    pub fn allow_lan(&self) -> bool {
        self.allow_lan
    }

    /// Whether DHCP client traffic is exempted
    pub fn allow_dhcp(&self) -> bool {
        self.allow_dhcp
    }

    /// Endpoints in first-seen order
    pub fn endpoints(&self) -> &[EndpointRule] {
        &self.vpn_endpoints
    }

    /// Pretty JSON form, as printed by `print-config` and stored in the state file
    pub fn to_json_pretty(&self) -> String {
        // Serializing plain strings, numbers and bools cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Sections of a parsed WireGuard file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawWireGuardConfig {
    /// `[Interface]` keys
    pub interface: BTreeMap<String, String>,
    /// One map per `[Peer]`, in file order
    pub peers: Vec<BTreeMap<String, String>>,
}

/// Record persisted while a run is in its monitor loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    /// Pid of the running instance
    pub pid: u32,
    /// Local start time, `%Y-%m-%d %H:%M:%S`
    pub started_at: String,
    /// Policy the instance enforces
    pub config: PolicyModel,
    /// Caller-supplied keys merged into the top-level object
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
