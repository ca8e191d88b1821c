//! Target parsing and classification.
//!
//! Targets are opaque strings supplied by callers: full URLs, bare hosts,
//! `host:port` pairs, IPs, or CIDRs. Host comparisons across the engine are
//! case-insensitive with trailing dots stripped.

use std::net::IpAddr;

use ipnet::IpNet;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Url,
    Host,
    Ip,
    Cidr,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Url => "url",
            TargetKind::Host => "host",
            TargetKind::Ip => "ip",
            TargetKind::Cidr => "cidr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub raw: String,
    pub kind: TargetKind,
    pub host: Option<String>,
    pub scheme: Option<String>,
    pub port: Option<u16>,
}

impl TargetInfo {
    /// Normalized host for comparisons: the parsed host when one exists,
    /// otherwise the raw string, lowercased with any trailing dot stripped.
    pub fn normalized_host(&self) -> String {
        let h = self.host.as_deref().unwrap_or(&self.raw);
        normalize_host(h)
    }
}

/// Lowercase and strip trailing dots for host comparison.
pub fn normalize_host(host: &str) -> String {
    host.trim().to_lowercase().trim_end_matches('.').to_string()
}

/// Classify a target string as url, cidr, ip, or host[:port].
pub fn parse_target(target: &str) -> TargetInfo {
    let t = target.trim();

    if let Ok(u) = Url::parse(t) {
        if !u.scheme().is_empty() && u.host_str().is_some() {
            return TargetInfo {
                raw: t.to_string(),
                kind: TargetKind::Url,
                host: u.host_str().map(|h| h.to_string()),
                scheme: Some(u.scheme().to_string()),
                port: u.port(),
            };
        }
    }

    if t.contains('/') && t.parse::<IpNet>().is_ok() {
        return TargetInfo {
            raw: t.to_string(),
            kind: TargetKind::Cidr,
            host: None,
            scheme: None,
            port: None,
        };
    }

    if t.parse::<IpAddr>().is_ok() {
        return TargetInfo {
            raw: t.to_string(),
            kind: TargetKind::Ip,
            host: Some(t.to_string()),
            scheme: None,
            port: None,
        };
    }

    // host[:port] with a numeric port; anything else is a plain host.
    if let Some((h, p)) = t.split_once(':') {
        if !h.is_empty() && !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(port) = p.parse::<u16>() {
                return TargetInfo {
                    raw: t.to_string(),
                    kind: TargetKind::Host,
                    host: Some(h.to_string()),
                    scheme: None,
                    port: Some(port),
                };
            }
        }
    }

    TargetInfo {
        raw: t.to_string(),
        kind: TargetKind::Host,
        host: Some(t.to_string()),
        scheme: None,
        port: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url() {
        let info = parse_target("https://Example.com:8443/login");
        assert_eq!(info.kind, TargetKind::Url);
        assert_eq!(info.scheme.as_deref(), Some("https"));
        assert_eq!(info.port, Some(8443));
        assert_eq!(info.normalized_host(), "example.com");
    }

    #[test]
    fn parses_cidr() {
        let info = parse_target("192.168.1.0/24");
        assert_eq!(info.kind, TargetKind::Cidr);
        assert!(info.host.is_none());
    }

    #[test]
    fn parses_ip() {
        let info = parse_target("10.0.0.5");
        assert_eq!(info.kind, TargetKind::Ip);
        assert_eq!(info.host.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn parses_host_port() {
        let info = parse_target("db.internal:5432");
        assert_eq!(info.kind, TargetKind::Host);
        assert_eq!(info.host.as_deref(), Some("db.internal"));
        assert_eq!(info.port, Some(5432));
    }

    #[test]
    fn bare_host_with_trailing_dot() {
        let info = parse_target("Example.COM.");
        assert_eq!(info.kind, TargetKind::Host);
        assert_eq!(info.normalized_host(), "example.com");
    }

    #[test]
    fn non_numeric_port_is_plain_host() {
        let info = parse_target("weird:name");
        assert_eq!(info.host.as_deref(), Some("weird:name"));
        assert_eq!(info.port, None);
    }
}
