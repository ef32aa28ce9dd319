// Policy construction from WireGuard files

//! Policy construction
//!
//! Composes a parsed WireGuard file, resolved peer endpoints and caller
//! overrides into a validated [`PolicyModel`].

use crate::endpoint::{parse_endpoint, resolve_host_ips, HostLookup};
use crate::error::{Result, RouteGuardError};
use crate::types::{EndpointRule, Mode, PolicyModel, DEFAULT_POLL_INTERVAL_SECS};
use crate::wg_config::{infer_iface_name, load_wireguard_config};
use std::path::Path;

/// Caller-supplied settings layered over the WireGuard file
#[derive(Debug, Clone)]
pub struct PolicyOverrides {
    /// Tunnel interface; inferred from the file name when `None`
    pub vpn_iface: Option<String>,
    /// Operating mode
    pub mode: Mode,
    /// Seconds between monitor cycles
    pub poll_interval_sec: u64,
    /// Exempt private LAN ranges
    pub allow_lan: bool,
    /// Exempt DHCPv4/DHCPv6 client traffic
    pub allow_dhcp: bool,
}

impl Default for PolicyOverrides {
    fn default() -> Self {
        Self {
            vpn_iface: None,
            mode: Mode::Monitor,
            poll_interval_sec: DEFAULT_POLL_INTERVAL_SECS,
            allow_lan: true,
            allow_dhcp: true,
        }
    }
}

/// Build the policy for a WireGuard config file
///
/// Every peer carrying an `Endpoint` contributes one UDP rule per resolved
/// address. Peers without an endpoint (roaming clients) are skipped.
///
/// # Errors
///
/// Propagates parse, format and resolution errors; returns
/// [`RouteGuardError::Config`] when no peer yields an endpoint.
pub async fn build_policy_from_wg<P, L>(
    wg_config_path: P,
    overrides: &PolicyOverrides,
    lookup: &L,
) -> Result<PolicyModel>
where
    P: AsRef<Path>,
    L: HostLookup,
{
    let path = wg_config_path.as_ref();
    let raw = load_wireguard_config(path)?;

    let vpn_iface = match &overrides.vpn_iface {
        Some(iface) => iface.clone(),
        None => infer_iface_name(path),
    };

    let mut endpoints: Vec<EndpointRule> = Vec::new();
    for peer in &raw.peers {
        let Some(endpoint) = peer.get("Endpoint") else {
            continue;
        };
        let (host, port) = parse_endpoint(endpoint)?;
        for ip in resolve_host_ips(lookup, &host).await? {
            let rule = EndpointRule::udp(ip, port);
            if !endpoints.contains(&rule) {
                endpoints.push(rule);
            }
        }
    }

    if endpoints.is_empty() {
        return Err(RouteGuardError::Config(
            "No Peer Endpoint found in WireGuard config.".to_string(),
        ));
    }

    PolicyModel::new(
        overrides.mode,
        vpn_iface,
        overrides.poll_interval_sec,
        overrides.allow_lan,
        overrides.allow_dhcp,
        endpoints,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::testing::StaticLookup;
    use crate::endpoint::SystemLookup;
    use crate::ruleset::build_nft_script;
    use crate::types::Proto;
    use std::fs;
    use std::net::IpAddr;

    fn write_conf(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_single_literal_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            &dir,
            "wg0.conf",
            "[Interface]\nAddress = 10.8.0.2/32\n[Peer]\nEndpoint = 203.0.113.5:51820\n",
        );

        let policy = build_policy_from_wg(&path, &PolicyOverrides::default(), &SystemLookup)
            .await
            .unwrap();

        assert_eq!(policy.vpn_iface(), "wg0");
        assert_eq!(policy.mode(), Mode::Monitor);
        assert_eq!(policy.endpoints().len(), 1);
        let ep = policy.endpoints()[0];
        assert_eq!(ep.ip, "203.0.113.5".parse::<IpAddr>().unwrap());
        assert_eq!(ep.port, 51820);
        assert_eq!(ep.proto, Proto::Udp);
    }

    #[tokio::test]
    async fn test_protect_policy_compiles_to_kill_switch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            &dir,
            "wg0.conf",
            "[Interface]\nAddress = 10.8.0.2/32\n\n[Peer]\nEndpoint = 203.0.113.5:51820\n",
        );
        let overrides = PolicyOverrides {
            mode: Mode::Protect,
            allow_lan: true,
            allow_dhcp: true,
            ..PolicyOverrides::default()
        };

        let policy = build_policy_from_wg(&path, &overrides, &StaticLookup::default())
            .await
            .unwrap();
        let script = build_nft_script(&policy);
        let rules: Vec<&str> = script
            .lines()
            .map(str::trim)
            .filter(|l| l.ends_with(" accept") || l.ends_with(" drop"))
            .filter(|l| !l.starts_with("type "))
            .collect();

        let endpoint_rules: Vec<&&str> = rules.iter().filter(|l| l.contains("dport 51820")).collect();
        assert_eq!(endpoint_rules, vec![&"ip daddr 203.0.113.5 udp dport 51820 accept"]);
        assert!(rules.contains(&"udp sport 68 udp dport 67 accept"));
        assert!(rules.contains(&"udp sport 546 udp dport 547 accept"));
        assert!(rules.contains(&"ip daddr { 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16 } accept"));
        assert!(rules.contains(&"ip6 daddr fc00::/7 accept"));
        assert_eq!(rules.first(), Some(&"oifname \"lo\" accept"));
        assert_eq!(rules.last(), Some(&"oifname != \"wg0\" drop"));
    }

    #[tokio::test]
    async fn test_overrides_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(&dir, "home.conf", "[Peer]\nEndpoint = [2001:db8::1]:51820\n");

        let overrides = PolicyOverrides {
            vpn_iface: Some("tun7".to_string()),
            mode: Mode::Protect,
            poll_interval_sec: 0,
            allow_lan: false,
            allow_dhcp: false,
        };
        let policy = build_policy_from_wg(&path, &overrides, &SystemLookup)
            .await
            .unwrap();

        assert_eq!(policy.vpn_iface(), "tun7");
        assert_eq!(policy.mode(), Mode::Protect);
        assert_eq!(policy.poll_interval_sec(), 1);
        assert!(!policy.allow_lan());
        assert!(!policy.allow_dhcp());
    }

    #[tokio::test]
    async fn test_multiple_peers_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            &dir,
            "wg1.conf",
            "[Peer]\nEndpoint = vpn.example.net:51820\n\
             [Peer]\nEndpoint = 198.51.100.1:51820\n\
             [Peer]\nPublicKey = roaming\n",
        );
        let lookup = StaticLookup::with("vpn.example.net", &["198.51.100.1", "198.51.100.2"]);

        let policy = build_policy_from_wg(&path, &PolicyOverrides::default(), &lookup)
            .await
            .unwrap();

        let ips: Vec<String> = policy.endpoints().iter().map(|e| e.ip.to_string()).collect();
        assert_eq!(ips, vec!["198.51.100.1", "198.51.100.2"]);
    }

    #[tokio::test]
    async fn test_no_endpoint_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(&dir, "wg2.conf", "[Peer]\nPublicKey = abc\n");

        let err = build_policy_from_wg(&path, &PolicyOverrides::default(), &SystemLookup).await;
        assert!(matches!(err, Err(RouteGuardError::Config(_))));
    }

    #[tokio::test]
    async fn test_bad_endpoint_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(&dir, "wg3.conf", "[Peer]\nEndpoint = 203.0.113.5\n");

        let err = build_policy_from_wg(&path, &PolicyOverrides::default(), &SystemLookup).await;
        assert!(matches!(err, Err(RouteGuardError::EndpointFormat(_))));
    }

    #[tokio::test]
    async fn test_unresolvable_host_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(&dir, "wg4.conf", "[Peer]\nEndpoint = nowhere.invalid:51820\n");

        let err = build_policy_from_wg(&path, &PolicyOverrides::default(), &StaticLookup::default())
            .await;
        assert!(matches!(err, Err(RouteGuardError::Resolution { .. })));
    }
}
