use posture_core::{Finding, IssueStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RunId = i64;

/// Run metadata as returned by list operations; payloads stay on disk until
/// a caller asks for the full run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: RunId,
    pub ts: i64,
    pub target: String,
    pub scans: Vec<String>,
}

/// Full immutable run payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRun {
    pub id: RunId,
    pub ts: i64,
    pub target: String,
    pub scans: Vec<String>,
    pub results: Value,
    pub findings: Vec<Finding>,
}

/// One observation of a finding, fed into the issue tracker by the sync
/// driver. `last_seen_ts` is evidence time (the run timestamp), not wall
/// clock, so replaying a sync never fabricates newer sightings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub asset: String,
    pub category: String,
    pub title: String,
    pub severity: i64,
    pub owner: String,
    pub environment: String,
    pub last_seen_ts: i64,
    pub last_run_id: RunId,
    pub remediation: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub fingerprint: String,
    pub asset: String,
    pub category: String,
    pub title: String,
    pub severity: i64,
    #[serde(with = "status_str")]
    pub status: IssueStatus,
    pub owner: String,
    pub environment: String,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
    pub last_run_id: RunId,
    pub status_updated_ts: i64,
    /// 0 while unresolved.
    pub resolved_ts: i64,
    pub reopened_count: i64,
    pub remediation: String,
    pub details: String,
}

mod status_str {
    use posture_core::IssueStatus;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(status: &IssueStatus, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(status.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub kind: String,
    pub value: String,
    pub tags: Vec<String>,
    pub owner: String,
    pub environment: String,
    pub ts: i64,
}
