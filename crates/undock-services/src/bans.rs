//! Ban list — remote addresses refused at the router's front door.
//!
//! Bans are keyed on the host part of an address. A caller's port changes
//! with every connection, so `"10.0.0.5:41234"` and `"10.0.0.5:50000"` are
//! the same ban. Bans last for the life of the process.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::DashSet;

#[derive(Clone, Default)]
pub struct BanList {
    banned: Arc<DashSet<String>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban an address. Idempotent. Returns `true` if it was not banned yet.
    pub fn ban(&self, addr: &str) -> bool {
        let key = normalize(addr);
        let inserted = self.banned.insert(key.clone());
        if inserted {
            tracing::info!(addr = %key, "address banned");
        }
        inserted
    }

    pub fn is_banned(&self, addr: &str) -> bool {
        self.banned.contains(&normalize(addr))
    }

    /// Every banned key, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut out: Vec<String> = self.banned.iter().map(|k| k.key().clone()).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }
}

/// Reduce `ip`, `ip:port`, `[ip]:port` and `[ip%scope]:port` to the bare IP.
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) become plain IPv4.
/// Anything that does not parse as an address is kept as trimmed text.
pub fn normalize(addr: &str) -> String {
    let addr = addr.trim();
    if let Ok(sa) = addr.parse::<SocketAddr>() {
        return canonical(sa.ip());
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return canonical(ip);
    }
    // `[fe80::1%eth0]:80` does not parse as a SocketAddr; strip by hand.
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            let host = host.split('%').next().unwrap_or(host);
            if let Ok(ip) = host.parse::<IpAddr>() {
                return canonical(ip);
            }
        }
    }
    addr.to_string()
}

/// A dual-stack listener reports IPv4 callers as `::ffff:a.b.c.d`.
fn canonical(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_address_is_not_banned() {
        let bans = BanList::new();
        assert!(!bans.is_banned("10.0.0.1"));
        assert!(bans.is_empty());
    }

    #[test]
    fn ban_ignores_port() {
        let bans = BanList::new();
        assert!(bans.ban("10.0.0.5:41234"));
        assert!(bans.is_banned("10.0.0.5"));
        assert!(bans.is_banned("10.0.0.5:50000"));
        assert!(!bans.is_banned("10.0.0.6:41234"));

        // Same caller seen through a dual-stack listener.
        assert!(bans.is_banned("[::ffff:10.0.0.5]:5000"));
        assert!(bans.ban("[::ffff:10.0.0.9]:5000") && bans.is_banned("10.0.0.9:1"));
    }

    #[test]
    fn ban_is_idempotent() {
        let bans = BanList::new();
        assert!(bans.ban("10.0.0.5"));
        assert!(!bans.ban("10.0.0.5"));
        assert!(!bans.ban("10.0.0.5:1"));
        assert_eq!(bans.len(), 1);
        assert_eq!(bans.list(), vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn normalize_handles_ipv6_forms() {
        assert_eq!(normalize("[::1]:8080"), "::1");
        assert_eq!(normalize("::1"), "::1");
        assert_eq!(normalize("[fe80::1%eth0]:80"), "fe80::1");
        assert_eq!(normalize("  10.1.2.3 "), "10.1.2.3");
        assert_eq!(normalize("not-an-ip"), "not-an-ip");
        assert_eq!(normalize("[::ffff:10.0.0.9]:5000"), "10.0.0.9");
        assert_eq!(normalize("::ffff:10.0.0.9"), "10.0.0.9");
    }

    #[test]
    fn clones_share_state() {
        let bans = BanList::new();
        let other = bans.clone();
        other.ban("192.168.1.1");
        assert!(bans.is_banned("192.168.1.1:9"));
    }
}
