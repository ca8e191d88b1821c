//! Exposure signals: open-port evidence extracted from stored run results.
//!
//! The open-ports table is a formatted text blob inside the raw results, which
//! makes this the most fragile contract in the engine. The whole grammar
//! (header row, dash separator, `<port>/tcp <service> <version...>` rows)
//! lives here behind one parser; every caller gets the same tolerance rules.
//! Parsing never fails: any anomaly yields an empty result for that run so a
//! single malformed payload cannot blank an aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use posture_core::target::parse_target;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const NMAP_CATEGORY: &str = "Nmap Scan";
// Some scanner builds emit the title with a leading newline.
const OPEN_PORTS_TITLES: [&str; 2] = ["\nOpen Ports", "Open Ports"];

const SERVER_CATEGORY: &str = "Web Server Technology";
const SERVER_TITLE: &str = "Detected Server";
const SERVER_PREFIX: &str = "Server header:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    /// "80/tcp"
    pub port: String,
    pub service: String,
    pub version: String,
}

impl OpenPort {
    /// Identity token for diffing: port plus service, version ignored.
    pub fn token(&self) -> String {
        if self.service.is_empty() {
            self.port.clone()
        } else {
            format!("{} {}", self.port, self.service)
        }
    }
}

fn port_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,5}/tcp)\s+(\S+)(?:\s+(.*))?$").expect("port row regex"))
}

fn port_cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,5}/tcp$").expect("port cell regex"))
}

fn port_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,5})/tcp$").expect("port number regex"))
}

fn two_spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("column split regex"))
}

/// Best-effort structured parse of the open-ports table from raw run results.
///
/// Returns one entry per distinct port, in table order. Missing categories,
/// an empty body, or "No open ports found." all yield an empty list.
pub fn extract_open_ports(results: &Value) -> Vec<OpenPort> {
    let Some(details) = open_ports_details(results) else {
        return Vec::new();
    };
    parse_port_table(details)
}

fn open_ports_details(results: &Value) -> Option<&str> {
    let nmap = results.get(NMAP_CATEGORY)?;
    let entry = OPEN_PORTS_TITLES.iter().find_map(|t| nmap.get(t))?;
    let details = entry.get("details")?.as_str()?;
    if details.trim().is_empty() {
        return None;
    }
    Some(details)
}

/// Parse the formatted table body. Header and separator lines are skipped by
/// shape, not position, so preamble variations are tolerated.
pub fn parse_port_table(details: &str) -> Vec<OpenPort> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();

    for line in details.lines() {
        let s = line.trim();
        if s.is_empty()
            || s.to_lowercase().starts_with("port")
            || s.chars().all(|c| c == '-' || c.is_whitespace())
        {
            continue;
        }

        let parsed = parse_port_row(s);
        if let Some(p) = parsed {
            if seen.insert(p.port.clone()) {
                out.push(p);
            }
        }
    }

    out
}

fn parse_port_row(s: &str) -> Option<OpenPort> {
    // Formatted table columns: "80/tcp  http  nginx 1.25".
    let parts: Vec<&str> = two_spaces_re().split(s).collect();
    if parts.len() >= 2 && port_cell_re().is_match(parts[0]) {
        return Some(OpenPort {
            port: parts[0].to_string(),
            service: parts[1].to_string(),
            version: parts.get(2).map(|v| v.trim().to_string()).unwrap_or_default(),
        });
    }

    // Fallback: single-spaced "80/tcp http nginx ...".
    let caps = port_row_re().captures(s)?;
    Some(OpenPort {
        port: caps[1].to_string(),
        service: caps[2].to_string(),
        version: caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

/// Extract the reported server header string, if any scanner recorded one.
pub fn extract_server_header(results: &Value) -> Option<String> {
    let details = results
        .get(SERVER_CATEGORY)?
        .get(SERVER_TITLE)?
        .get("details")?
        .as_str()?;
    let value = details.strip_prefix(SERVER_PREFIX).unwrap_or(details).trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Fixed 1-5 risk weight for a port token like "22/tcp".
///
/// The policy is part of the output contract; scores replayed over historical
/// evidence must not drift when weights are tuned, so treat changes here as
/// breaking.
pub fn port_risk_weight(port: &str) -> u64 {
    let p = port.trim().to_lowercase();
    let Some(caps) = port_number_re().captures(&p) else {
        return 1;
    };
    let Ok(n) = caps[1].parse::<u32>() else {
        return 1;
    };

    // Remote admin and common ransomware propagation ports.
    if [3389, 445, 135, 139].contains(&n) {
        return 5;
    }
    if [22, 21, 23, 5900, 5985, 5986, 3306, 5432, 6379, 9200, 27017].contains(&n) {
        return 4;
    }
    if [389, 636, 8080, 8443, 8000, 8008, 8081, 8888, 15672].contains(&n) {
        return 3;
    }
    // Web is common but not automatically bad.
    if [80, 443].contains(&n) {
        return 2;
    }
    1
}

/// Aggregated open-port exposure across a set of runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortSummary {
    /// port -> distinct normalized hosts exposing it
    pub assets_by_port: BTreeMap<String, BTreeSet<String>>,
    /// port -> |hosts|
    pub counts_by_port: BTreeMap<String, u64>,
    /// port -> |hosts| * risk weight
    pub risk_points_by_port: BTreeMap<String, u64>,
}

impl PortSummary {
    pub fn total_risk_points(&self) -> u64 {
        self.risk_points_by_port.values().sum()
    }
}

/// Aggregate open ports across runs (typically latest-per-target), attributing
/// each distinct port to the run's normalized host. At most `max_assets` runs
/// are considered.
pub fn summarize_open_ports_by_asset<'a, I>(runs: I, max_assets: usize) -> PortSummary
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut summary = PortSummary::default();

    for (target, results) in runs.into_iter().take(max_assets) {
        let host = parse_target(target).normalized_host();
        if host.is_empty() {
            continue;
        }
        for p in extract_open_ports(results) {
            summary
                .assets_by_port
                .entry(p.port)
                .or_default()
                .insert(host.clone());
        }
    }

    for (port, hosts) in &summary.assets_by_port {
        let count = hosts.len() as u64;
        summary.counts_by_port.insert(port.clone(), count);
        summary
            .risk_points_by_port
            .insert(port.clone(), count * port_risk_weight(port));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nmap_results(details: &str) -> Value {
        json!({"Nmap Scan": {"\nOpen Ports": {"severity": 0, "details": details}}})
    }

    const TABLE: &str = "Port     Service  Version\n-------  -------  -------\n22/tcp   ssh      OpenSSH 9.6\n80/tcp   http     nginx 1.25\n";

    #[test]
    fn parses_formatted_table() {
        let ports = extract_open_ports(&nmap_results(TABLE));
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port, "22/tcp");
        assert_eq!(ports[0].service, "ssh");
        assert_eq!(ports[0].version, "OpenSSH 9.6");
        assert_eq!(ports[1].token(), "80/tcp http");
    }

    #[test]
    fn parses_single_spaced_rows() {
        let ports = extract_open_ports(&nmap_results("443/tcp https nginx\n"));
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, "443/tcp");
        assert_eq!(ports[0].service, "https");
    }

    #[test]
    fn accepts_title_without_newline_prefix() {
        let results = json!({"Nmap Scan": {"Open Ports": {"details": "22/tcp ssh\n"}}});
        assert_eq!(extract_open_ports(&results).len(), 1);
    }

    #[test]
    fn no_open_ports_body_is_empty() {
        assert!(extract_open_ports(&nmap_results("No open ports found.")).is_empty());
        assert!(extract_open_ports(&nmap_results("   ")).is_empty());
    }

    #[test]
    fn missing_category_is_empty() {
        assert!(extract_open_ports(&json!({})).is_empty());
        assert!(extract_open_ports(&json!({"Nmap Scan": "oops"})).is_empty());
        assert!(extract_open_ports(&json!(null)).is_empty());
    }

    #[test]
    fn dedupes_by_port() {
        let ports = extract_open_ports(&nmap_results("80/tcp http\n80/tcp http-alt\n"));
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].service, "http");
    }

    #[test]
    fn garbage_lines_never_panic() {
        for junk in [
            "lorem ipsum",
            "99999999/tcp x",
            "-1/tcp x",
            "80/udp dns",
            "\u{0}\u{1}\u{2}",
            "80/tcp",
            "port/tcp  x",
            "---- ---- ----",
        ] {
            let _ = extract_open_ports(&nmap_results(junk));
        }
    }

    #[test]
    fn server_header_extraction() {
        let results = json!({
            "Web Server Technology": {"Detected Server": {"details": "Server header: nginx"}}
        });
        assert_eq!(extract_server_header(&results).as_deref(), Some("nginx"));
        assert_eq!(extract_server_header(&json!({})), None);
    }

    #[test]
    fn risk_weights_match_policy() {
        assert_eq!(port_risk_weight("3389/tcp"), 5);
        assert_eq!(port_risk_weight("445/tcp"), 5);
        assert_eq!(port_risk_weight("22/tcp"), 4);
        assert_eq!(port_risk_weight("8080/tcp"), 3);
        assert_eq!(port_risk_weight("80/tcp"), 2);
        assert_eq!(port_risk_weight("443/tcp"), 2);
        assert_eq!(port_risk_weight("12345/tcp"), 1);
        assert_eq!(port_risk_weight("not-a-port"), 1);
        assert_eq!(port_risk_weight("22/udp"), 1);
    }

    #[test]
    fn summarizes_across_hosts() {
        let a = nmap_results("3389/tcp ms-wbt-server\n");
        let b = nmap_results("3389/tcp ms-wbt-server\n80/tcp http\n");
        let runs = vec![("alpha.example.com", &a), ("https://beta.example.com/", &b)];
        let summary = summarize_open_ports_by_asset(runs, 500);
        assert_eq!(summary.counts_by_port["3389/tcp"], 2);
        assert_eq!(summary.risk_points_by_port["3389/tcp"], 10);
        assert_eq!(summary.counts_by_port["80/tcp"], 1);
        assert!(summary.assets_by_port["3389/tcp"].contains("beta.example.com"));
        assert_eq!(summary.total_risk_points(), 12);
    }

    #[test]
    fn max_assets_caps_input() {
        let a = nmap_results("80/tcp http\n");
        let b = nmap_results("80/tcp http\n");
        let runs = vec![("one", &a), ("two", &b)];
        let summary = summarize_open_ports_by_asset(runs, 1);
        assert_eq!(summary.counts_by_port["80/tcp"], 1);
    }
}
