// Peer endpoint parsing and resolution

//! Endpoint parsing and resolution
//!
//! Turns a peer `Endpoint` value (`host:port` or `[v6]:port`) into concrete
//! addresses. Literal addresses never touch the network; names go through a
//! [`HostLookup`], so tests can substitute a fixed table for real DNS.

use crate::error::{Result, RouteGuardError};
use std::future::Future;
use std::io;
use std::net::IpAddr;

/// Forward name lookup
pub trait HostLookup: Send + Sync {
    /// Resolve `host` to every address usable for UDP transport
    fn lookup(&self, host: &str) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send;
}

/// System resolver backed by `getaddrinfo` via tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Split an endpoint string into host and port
///
/// # Errors
///
/// Returns [`RouteGuardError::EndpointFormat`] for anything other than
/// `host:port` (exactly one colon) or `[ipv6]:port` with a numeric port.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let endpoint = endpoint.trim();
    let bad = || RouteGuardError::EndpointFormat(endpoint.to_string());

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, port) = rest.rsplit_once("]:").ok_or_else(bad)?;
        if host.is_empty() || host.contains(']') {
            return Err(bad());
        }
        (host, port)
    } else {
        if endpoint.matches(':').count() != 1 {
            return Err(bad());
        }
        let (host, port) = endpoint.split_once(':').ok_or_else(bad)?;
        if host.is_empty() {
            return Err(bad());
        }
        (host, port)
    };

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let port: u16 = port.parse().map_err(|_| bad())?;

    Ok((host.to_string(), port))
}

/// Resolve a host to its addresses, literal first, DNS otherwise
///
/// Results are deduplicated in first-seen order.
///
/// # Errors
///
/// Returns [`RouteGuardError::Resolution`] if the lookup fails or yields no address.
pub async fn resolve_host_ips<L: HostLookup>(lookup: &L, host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let resolved = lookup
        .lookup(host)
        .await
        .map_err(|e| RouteGuardError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let mut ips: Vec<IpAddr> = Vec::new();
    for ip in resolved {
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    if ips.is_empty() {
        return Err(RouteGuardError::Resolution {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        });
    }

    log::debug!("Resolved {} -> {:?}", host, ips);
    Ok(ips)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed name table; unknown names fail like NXDOMAIN
    #[derive(Default)]
    pub struct StaticLookup {
        pub table: HashMap<String, Vec<IpAddr>>,
        pub calls: AtomicUsize,
    }

    impl StaticLookup {
        pub fn with(host: &str, ips: &[&str]) -> Self {
            let mut lookup = Self::default();
            lookup.insert(host, ips);
            lookup
        }

        pub fn insert(&mut self, host: &str, ips: &[&str]) {
            let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
            self.table.insert(host.to_string(), ips);
        }
    }

    impl HostLookup for StaticLookup {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Name or service not known"))
        }
    }
}
