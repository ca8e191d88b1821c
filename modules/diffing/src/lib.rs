//! What changed between two runs?
//!
//! Diffs at two layers: normalized findings (keyed by asset/category/title)
//! and exposure signals (open-port tokens plus the server header). Stateless
//! and read-only; callers supply the two run payloads.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use exposure::{extract_open_ports, extract_server_header};
use posture_core::Finding;
use serde::Serialize;
use serde_json::Value;

/// Added/resolved findings between an old and a new run, key-sorted so output
/// is deterministic regardless of input order. Presentation layers re-sort by
/// severity as needed.
pub fn diff_findings(old: &[Finding], new: &[Finding]) -> (Vec<Finding>, Vec<Finding>) {
    let old_map: BTreeMap<_, _> = old.iter().map(|f| (f.key(), f)).collect();
    let new_map: BTreeMap<_, _> = new.iter().map(|f| (f.key(), f)).collect();

    let added = new_map
        .iter()
        .filter(|(k, _)| !old_map.contains_key(*k))
        .map(|(_, f)| (*f).clone())
        .collect();
    let resolved = old_map
        .iter()
        .filter(|(k, _)| !new_map.contains_key(*k))
        .map(|(_, f)| (*f).clone())
        .collect();
    (added, resolved)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerHeaderChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExposureDiff {
    pub added_ports: Vec<String>,
    pub removed_ports: Vec<String>,
    /// Present only when the server header actually changed.
    pub server_header: Option<ServerHeaderChange>,
}

impl ExposureDiff {
    pub fn is_empty(&self) -> bool {
        self.added_ports.is_empty()
            && self.removed_ports.is_empty()
            && self.server_header.is_none()
    }
}

/// Exposure delta between two raw result payloads.
///
/// Port identity is the "<port>/tcp <service>" token; version strings churn
/// on every scanner upgrade and are deliberately ignored.
pub fn diff_exposure(old_results: &Value, new_results: &Value) -> ExposureDiff {
    let old_ports: BTreeSet<String> = extract_open_ports(old_results)
        .iter()
        .map(|p| p.token())
        .collect();
    let new_ports: BTreeSet<String> = extract_open_ports(new_results)
        .iter()
        .map(|p| p.token())
        .collect();

    let added_ports = new_ports.difference(&old_ports).cloned().collect();
    let removed_ports = old_ports.difference(&new_ports).cloned().collect();

    let old_server = extract_server_header(old_results);
    let new_server = extract_server_header(new_results);
    let server_header = if old_server != new_server {
        Some(ServerHeaderChange {
            old: old_server,
            new: new_server,
        })
    } else {
        None
    };

    ExposureDiff {
        added_ports,
        removed_ports,
        server_header,
    }
}

/// Full delta between two stored runs of the same target.
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub target: String,
    pub old_run_id: i64,
    pub new_run_id: i64,
    pub new_findings: Vec<Finding>,
    pub resolved_findings: Vec<Finding>,
    pub exposure: ExposureDiff,
}

impl DiffResult {
    pub fn build(
        target: &str,
        old_run_id: i64,
        new_run_id: i64,
        old_findings: &[Finding],
        new_findings: &[Finding],
        old_results: &Value,
        new_results: &Value,
    ) -> Self {
        let (added, resolved) = diff_findings(old_findings, new_findings);
        DiffResult {
            target: target.to_string(),
            old_run_id,
            new_run_id,
            new_findings: added,
            resolved_findings: resolved,
            exposure: diff_exposure(old_results, new_results),
        }
    }
}
