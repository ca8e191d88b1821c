//! Core types shared across the posture engine: target classification,
//! normalized findings, and the issue lifecycle.

pub mod finding;
pub mod issue;
pub mod target;

pub use finding::Finding;
pub use issue::{fingerprint, transition, IssueStatus, LifecycleDecision};
pub use target::{parse_target, TargetInfo, TargetKind};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Current unix time in seconds. Callers that need determinism pass their
/// own `now` into store/upsert operations instead of calling this.
pub fn now_ts() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }

    #[test]
    fn now_is_positive() {
        assert!(now_ts() > 0);
    }
}
