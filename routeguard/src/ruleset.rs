// nftables kill-switch ruleset compiler

//! Ruleset compilation
//!
//! Turns a [`PolicyModel`] into an nftables script for `nft -f -`. The chain
//! keeps the default `accept` policy and ends with an explicit drop of
//! everything not leaving through the tunnel, so rule order carries the
//! security semantics: first match wins.

use crate::types::PolicyModel;
use std::fmt::Write;

/// Table family of the managed table
pub const TABLE_FAMILY: &str = "inet";
/// Name of the managed table
pub const TABLE_NAME: &str = "routeguard";
/// Output chain inside the managed table
pub const CHAIN_NAME: &str = "rg_output";

/// Private IPv4 destinations exempted when LAN access is allowed
pub const PRIVATE_V4_CIDRS: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];
/// Unique local IPv6 range exempted when LAN access is allowed
pub const PRIVATE_V6_CIDR: &str = "fc00::/7";
/// IPv6 link-local and multicast, always exempted
pub const LINK_LOCAL_V6: [&str; 2] = ["fe80::/10", "ff00::/8"];

/// Strip quote characters so the name cannot break out of an `oifname "..."` literal
pub fn sanitize_iface(name: &str) -> String {
    name.chars().filter(|c| *c != '"' && *c != '\'').collect()
}

/// Compile the kill-switch ruleset for `policy`
///
/// Output is byte-identical for identical policies.
pub fn build_nft_script(policy: &PolicyModel) -> String {
    let iface = sanitize_iface(policy.vpn_iface());
    let mut out = String::new();

    // Writing into a String is infallible
    let _ = writeln!(out, "table {} {} {{", TABLE_FAMILY, TABLE_NAME);
    let _ = writeln!(out, "  chain {} {{", CHAIN_NAME);
    out.push_str("    type filter hook output priority filter; policy accept;\n");
    out.push_str("    oifname \"lo\" accept\n");
    let _ = writeln!(out, "    oifname \"{}\" accept", iface);
    let _ = writeln!(out, "    ip6 daddr {{ {} }} accept", LINK_LOCAL_V6.join(", "));

    if policy.allow_dhcp() {
        out.push_str("    udp sport 68 udp dport 67 accept\n");
        out.push_str("    udp sport 546 udp dport 547 accept\n");
    }

    if policy.allow_lan() {
        let _ = writeln!(out, "    ip daddr {{ {} }} accept", PRIVATE_V4_CIDRS.join(", "));
        let _ = writeln!(out, "    ip6 daddr {} accept", PRIVATE_V6_CIDR);
    }

    for ep in policy.endpoints() {
        let family = if ep.ip.is_ipv6() { "ip6" } else { "ip" };
        let _ = writeln!(
            out,
            "    {} daddr {} {} dport {} accept",
            family,
            ep.ip,
            ep.proto.as_str(),
            ep.port
        );
    }

    let _ = writeln!(out, "    oifname != \"{}\" drop", iface);
    out.push_str("  }\n");
    out.push_str("}\n");
    out
}
