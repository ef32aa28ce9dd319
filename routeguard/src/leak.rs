// Split-default route leak detection

//! Route leak detection
//!
//! A malicious DHCP server can push `0.0.0.0/1` and `128.0.0.0/1` (or the
//! IPv6 halves `::/1` and `8000::/1`) through the physical uplink. Being more
//! specific than the VPN's default route, they silently pull all traffic out
//! of the tunnel. This module spots such routes; it only reads routing state.

use crate::executor::CommandExecutor;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Link-inspection binary
pub const IP: &str = "ip";

const SPLIT_DEFAULT_V4: [&str; 2] = ["0.0.0.0/1", "128.0.0.0/1"];
const SPLIT_DEFAULT_V6: [&str; 2] = ["::/1", "8000::/1"];

/// One entry of `ip -j route show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Route {
    /// Destination prefix, or `default`
    #[serde(default)]
    pub dst: Option<String>,
    /// Egress device
    #[serde(default)]
    pub dev: Option<String>,
    /// Output interface, reported instead of `dev` by some route types
    #[serde(default)]
    pub oif: Option<String>,
    /// Next hop, if any
    #[serde(default)]
    pub gateway: Option<String>,
}

impl Route {
    /// Egress device, from `dev` or `oif`
    pub fn device(&self) -> Option<&str> {
        self.dev
            .as_deref()
            .or(self.oif.as_deref())
            .filter(|d| !d.is_empty())
    }
}

/// Flag split-default routes that leave through anything but `vpn_iface`
///
/// Alerts read `<dst> via dev=<dev> gateway=<gw|->` and come back sorted.
pub fn scan(routes: &[Route], vpn_iface: &str, ipv6: bool) -> BTreeSet<String> {
    let targets: &[&str] = if ipv6 {
        &SPLIT_DEFAULT_V6
    } else {
        &SPLIT_DEFAULT_V4
    };

    routes
        .iter()
        .filter_map(|r| {
            let dst = r.dst.as_deref()?;
            let dev = r.device()?;
            if !targets.contains(&dst) || dev == vpn_iface {
                return None;
            }
            Some(format!(
                "{} via dev={} gateway={}",
                dst,
                dev,
                r.gateway.as_deref().unwrap_or("-")
            ))
        })
        .collect()
}

/// Parse `ip -j route` output; anything unparseable reads as an empty table
pub fn parse_routes(json: &str) -> Vec<Route> {
    let json = json.trim();
    if json.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<Route>>(json) {
        Ok(routes) => routes,
        Err(e) => {
            log::debug!("Ignoring unparseable route table: {}", e);
            Vec::new()
        }
    }
}

/// Polls the live main routing tables
pub struct LeakDetector<E> {
    exec: Arc<E>,
}

impl<E: CommandExecutor> LeakDetector<E> {
    /// Create a detector querying routes through `exec`
    pub fn new(exec: Arc<E>) -> Self {
        Self { exec }
    }

    /// Read the main routing table for one family
    pub async fn routes(&self, ipv6: bool) -> Vec<Route> {
        let mut args = vec!["-j"];
        if ipv6 {
            args.push("-6");
        }
        args.extend(["route", "show", "table", "main"]);

        match self.exec.run(IP, &args, None).await {
            Ok(out) if out.success() => parse_routes(&out.stdout),
            Ok(out) => {
                log::debug!("ip route query failed: {}", out.diagnostic());
                Vec::new()
            }
            Err(e) => {
                log::debug!("ip route query failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Scan both IPv4 and IPv6 tables
    pub async fn scan_host(&self, vpn_iface: &str) -> BTreeSet<String> {
        let mut alerts = scan(&self.routes(false).await, vpn_iface, false);
        alerts.extend(scan(&self.routes(true).await, vpn_iface, true));
        alerts
    }
}
