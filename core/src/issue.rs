//! Issue identity and lifecycle.
//!
//! An issue aggregates repeated observations of the same finding across runs.
//! Identity is a fingerprint over (asset, category, title); the lifecycle is
//! a small state machine whose only automatic transition is reopening a
//! resolved issue that resurfaces in newer evidence.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStatus {
    Open,
    Triaged,
    InProgress,
    Fixed,
    Accepted,
    FalsePositive,
}

#[derive(Debug, Error)]
#[error("unknown issue status: {0}")]
pub struct ParseStatusError(String);

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Triaged => "triaged",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Fixed => "fixed",
            IssueStatus::Accepted => "accepted",
            IssueStatus::FalsePositive => "false_positive",
        }
    }

    /// Resolved statuses clear from the active queue but may auto-reopen.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            IssueStatus::Fixed | IssueStatus::Accepted | IssueStatus::FalsePositive
        )
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IssueStatus::Open),
            "triaged" => Ok(IssueStatus::Triaged),
            "in_progress" => Ok(IssueStatus::InProgress),
            "fixed" => Ok(IssueStatus::Fixed),
            "accepted" => Ok(IssueStatus::Accepted),
            "false_positive" => Ok(IssueStatus::FalsePositive),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of observing an existing issue's fingerprint again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// Triage state untouched; only evidence fields refresh.
    Keep,
    /// Resolved issue resurfaced in newer evidence: back to open,
    /// resolved timestamp cleared, reopen counter bumped.
    Reopen,
}

/// Decide what a repeat observation does to an issue's triage state.
///
/// `seen_again` means the observation carries a strictly newer last-seen
/// timestamp than the stored record; stale or replayed observations never
/// reopen anything.
pub fn transition(current: IssueStatus, seen_again: bool) -> LifecycleDecision {
    if current.is_resolved() && seen_again {
        LifecycleDecision::Reopen
    } else {
        LifecycleDecision::Keep
    }
}

/// Stable issue fingerprint from (asset, category, title).
///
/// Fields are trimmed, lowercased, and length-prefixed before hashing so that
/// no choice of separator inside field values can collide two keys.
pub fn fingerprint(asset: &str, category: &str, title: &str) -> String {
    let mut h = Sha256::new();
    for field in [asset, category, title] {
        let f = field.trim().to_lowercase();
        h.update((f.len() as u64).to_be_bytes());
        h.update(f.as_bytes());
    }
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            IssueStatus::Open,
            IssueStatus::Triaged,
            IssueStatus::InProgress,
            IssueStatus::Fixed,
            IssueStatus::Accepted,
            IssueStatus::FalsePositive,
        ] {
            assert_eq!(s.as_str().parse::<IssueStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<IssueStatus>().is_err());
    }

    #[test]
    fn resolved_statuses() {
        assert!(IssueStatus::Fixed.is_resolved());
        assert!(IssueStatus::Accepted.is_resolved());
        assert!(IssueStatus::FalsePositive.is_resolved());
        assert!(!IssueStatus::Open.is_resolved());
        assert!(!IssueStatus::Triaged.is_resolved());
        assert!(!IssueStatus::InProgress.is_resolved());
    }

    #[test]
    fn resolved_and_seen_again_reopens() {
        assert_eq!(
            transition(IssueStatus::Fixed, true),
            LifecycleDecision::Reopen
        );
        assert_eq!(
            transition(IssueStatus::FalsePositive, true),
            LifecycleDecision::Reopen
        );
    }

    #[test]
    fn stale_observation_never_reopens() {
        assert_eq!(
            transition(IssueStatus::Fixed, false),
            LifecycleDecision::Keep
        );
    }

    #[test]
    fn active_statuses_keep() {
        assert_eq!(transition(IssueStatus::Open, true), LifecycleDecision::Keep);
        assert_eq!(
            transition(IssueStatus::InProgress, true),
            LifecycleDecision::Keep
        );
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        assert_eq!(
            fingerprint("Example.COM ", "Web", "Missing header"),
            fingerprint("example.com", "web", "missing header")
        );
    }

    #[test]
    fn fingerprint_is_separator_safe() {
        // Naive "a|c|t" joins would collide these.
        assert_ne!(fingerprint("a|b", "c", "t"), fingerprint("a", "b|c", "t"));
    }
}
