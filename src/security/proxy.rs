//! Trusted-proxy handling and client address resolution.
//!
//! Forwarding headers are only believed when the TCP peer is a configured
//! proxy. The client is then the right-most `X-Forwarded-For` hop that is not
//! itself a trusted proxy, so a client cannot spoof its address by prepending
//! entries.

use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

impl TrustedEntry {
    fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            TrustedEntry::Ip(trusted) => trusted == ip,
            TrustedEntry::Cidr(network) => network.contains(ip),
        }
    }
}

/// Parse `"10.0.0.1"` or `"10.0.0.0/8"` style entries.
pub fn parse_proxy_entry(entry: &str) -> Option<TrustedEntry> {
    let entry = entry.trim();
    if entry.contains('/') {
        entry.parse::<IpNet>().ok().map(TrustedEntry::Cidr)
    } else {
        entry.parse::<IpAddr>().ok().map(TrustedEntry::Ip)
    }
}

/// Set of proxies whose forwarding headers are honored. Built once at startup.
#[derive(Clone, Debug, Default)]
pub struct TrustedProxies {
    entries: Vec<TrustedEntry>,
}

impl TrustedProxies {
    pub fn from_config(proxies: &[String]) -> Self {
        let entries = proxies
            .iter()
            .filter_map(|p| {
                let parsed = parse_proxy_entry(p);
                if parsed.is_none() {
                    tracing::warn!(entry = %p, "Ignoring invalid trusted proxy entry");
                }
                parsed
            })
            .collect();
        Self { entries }
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        let ip = canonical(*ip);
        self.entries.iter().any(|e| e.contains(&ip))
    }

    /// Resolve the client address for a request received from `peer`.
    pub fn client_addr(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        let peer = canonical(peer);
        if !self.is_trusted(&peer) {
            return peer;
        }

        let hops: Vec<IpAddr> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
            .map(canonical)
            .collect();

        hops.iter()
            .rev()
            .find(|hop| !self.is_trusted(hop))
            .or_else(|| hops.first())
            .copied()
            .unwrap_or(peer)
    }
}

/// Unwrap IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`).
pub fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn default_proxies() -> TrustedProxies {
        TrustedProxies::from_config(&[
            "127.0.0.1".into(),
            "::1".into(),
            "10.0.0.0/8".into(),
            "172.16.0.0/12".into(),
            "192.168.0.0/16".into(),
        ])
    }

    fn xff(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_cidr_matching() {
        let proxies = default_proxies();
        assert!(proxies.is_trusted(&"10.200.3.4".parse().unwrap()));
        assert!(proxies.is_trusted(&"172.31.255.1".parse().unwrap()));
        assert!(!proxies.is_trusted(&"172.32.0.1".parse().unwrap()));
        assert!(!proxies.is_trusted(&"8.8.8.8".parse().unwrap()));
        assert!(proxies.is_trusted(&"::ffff:192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_untrusted_peer_headers_ignored() {
        let proxies = default_proxies();
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        assert_eq!(proxies.client_addr(peer, &xff("1.2.3.4")), peer);
    }

    #[test]
    fn test_trusted_peer_uses_rightmost_untrusted_hop() {
        let proxies = default_proxies();
        let peer: IpAddr = "10.0.0.5".parse().unwrap();
        let headers = xff("6.6.6.6, 198.51.100.7, 10.0.0.9");
        assert_eq!(
            proxies.client_addr(peer, &headers),
            "198.51.100.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_all_hops_trusted_falls_back_to_first() {
        let proxies = default_proxies();
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(
            proxies.client_addr(peer, &xff("192.168.0.2, 10.1.1.1")),
            "192.168.0.2".parse::<IpAddr>().unwrap()
        );
        assert_eq!(proxies.client_addr(peer, &HeaderMap::new()), peer);
    }

    #[test]
    fn test_invalid_entries_skipped() {
        assert!(parse_proxy_entry("10.0.0.0/33").is_none());
        assert!(parse_proxy_entry("localhost").is_none());
        assert_eq!(
            parse_proxy_entry("2001:db8::/32"),
            Some(TrustedEntry::Cidr("2001:db8::/32".parse().unwrap()))
        );
    }
}
