//! Normalized finding record: the unit every scanner observation is reduced
//! to before storage, diffing, and issue tracking.

use serde::{Deserialize, Serialize};

pub const SEVERITY_MAX: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub asset: String,
    pub scanner: String,
    pub category: String,
    pub title: String,
    /// 0-10, clamped at normalization time.
    pub severity: i64,
    #[serde(default = "default_confidence")]
    pub confidence: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub references: Vec<String>,
}

fn default_confidence() -> String {
    "unknown".to_string()
}

impl Finding {
    /// Identity key used by the diff engine and issue fingerprinting.
    pub fn key(&self) -> (String, String, String) {
        (
            self.asset.clone(),
            self.category.clone(),
            self.title.clone(),
        )
    }
}

/// Clamp a raw severity into the supported 0-10 range.
pub fn clamp_severity(sev: i64) -> i64 {
    sev.clamp(0, SEVERITY_MAX)
}
