//! Dashboard metrics aggregation.
//!
//! Summarizes what the engine currently knows (inventory + stored evidence)
//! into enterprise-style posture metrics with a composite 0-100 score.
//! Everything here is a pure function of its inputs, including the clock:
//! replaying the same function over an as-of-filtered run set reproduces the
//! historical dashboard exactly.

use std::collections::BTreeSet;

use exposure::summarize_open_ports_by_asset;
use posture_core::target::{normalize_host, parse_target};
use posture_core::Finding;
use serde::Serialize;
use serde_json::Value;

const DAY: i64 = 24 * 3600;

pub const WEIGHT_VULNERABILITY: u32 = 45;
pub const WEIGHT_EXPOSURE: u32 = 30;
pub const WEIGHT_COVERAGE: u32 = 15;
pub const WEIGHT_ACTIVITY: u32 = 10;

/// One inventory row, as supplied by the external asset import tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetSnapshot {
    pub kind: String,
    pub value: String,
    pub tags: Vec<String>,
    pub owner: String,
    pub environment: String,
}

/// Latest stored run for one target, with its full payload.
#[derive(Debug, Clone)]
pub struct RunEvidence<'a> {
    pub id: i64,
    pub ts: i64,
    pub target: &'a str,
    pub results: &'a Value,
    pub findings: &'a [Finding],
}

/// Global run counters from the evidence store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityCounters {
    pub total_runs: u64,
    pub runs_24h: u64,
    pub runs_7d: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityHistogram {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub info: u64,
}

impl SeverityHistogram {
    pub fn add(&mut self, severity: i64) {
        match severity {
            s if s >= 9 => self.critical += 1,
            s if s >= 7 => self.high += 1,
            s if s >= 4 => self.medium += 1,
            s if s >= 1 => self.low += 1,
            _ => self.info += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub vulnerability: u32,
    pub exposure: u32,
    pub coverage: u32,
    pub activity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardMetrics {
    pub ts: i64,

    // inventory
    pub total_assets: u64,
    /// (environment, count), count desc then name asc
    pub assets_by_env: Vec<(String, u64)>,
    pub owner_coverage_pct: u32,
    pub in_scope_tag_pct: u32,

    // run activity
    pub total_runs: u64,
    pub runs_24h: u64,
    pub runs_7d: u64,
    pub latest_run_ts: Option<i64>,

    // coverage
    pub targets_seen: u64,
    pub assets_scanned_7d: u64,
    pub assets_scanned_30d: u64,
    pub coverage_7d_pct: u32,
    pub coverage_30d_pct: u32,

    // risk / exposure
    pub findings_by_sev: SeverityHistogram,
    pub open_ports_total: u64,
    pub risk_points_total: u64,

    // scoring
    pub score: u32,
    pub grade: char,
    pub score_categories: ScoreBreakdown,
    pub score_weights: ScoreBreakdown,
}

/// Convert severity bucket counts into a 0-100 vulnerability score.
fn score_from_histogram(h: &SeverityHistogram) -> u32 {
    let penalty = h.critical * 18 + h.high * 8 + h.medium * 3 + h.low;
    100u64.saturating_sub(penalty).min(100) as u32
}

/// 0-100 score for exposed services, normalized by covered assets so large
/// inventories are not penalized for being large.
fn score_exposure(risk_points_total: u64, assets_scanned_30d: u64) -> u32 {
    let denom = assets_scanned_30d.max(1) as f64;
    let per_asset = risk_points_total as f64 / denom;

    if per_asset <= 0.5 {
        95
    } else if per_asset <= 1.0 {
        88
    } else if per_asset <= 2.0 {
        78
    } else if per_asset <= 4.0 {
        62
    } else if per_asset <= 7.0 {
        45
    } else {
        30
    }
}

fn score_coverage(coverage_pct: u32) -> u32 {
    match coverage_pct.min(100) {
        c if c >= 95 => 95,
        c if c >= 80 => 85,
        c if c >= 60 => 72,
        c if c >= 40 => 58,
        c if c >= 20 => 45,
        _ => 30,
    }
}

fn score_activity(runs_7d: u64) -> u32 {
    match runs_7d {
        r if r >= 50 => 92,
        r if r >= 20 => 85,
        r if r >= 10 => 78,
        r if r >= 4 => 65,
        r if r >= 1 => 52,
        _ => 35,
    }
}

fn weighted_score(categories: &ScoreBreakdown) -> u32 {
    let parts = [
        (categories.vulnerability, WEIGHT_VULNERABILITY),
        (categories.exposure, WEIGHT_EXPOSURE),
        (categories.coverage, WEIGHT_COVERAGE),
        (categories.activity, WEIGHT_ACTIVITY),
    ];
    let total_w: u32 = parts.iter().map(|(_, w)| w).sum();
    if total_w == 0 {
        return 0;
    }
    let acc: f64 = parts
        .iter()
        .map(|(s, w)| f64::from((*s).min(100)) * f64::from(*w))
        .sum();
    (acc / f64::from(total_w)).round() as u32
}

pub fn letter_grade(score: u32) -> char {
    match score {
        s if s >= 90 => 'A',
        s if s >= 80 => 'B',
        s if s >= 70 => 'C',
        s if s >= 60 => 'D',
        _ => 'F',
    }
}

fn pct(part: u64, whole: u64) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

/// Aggregate inventory, latest evidence, and run counters into dashboard
/// metrics. `now` is caller-supplied; passing a historical cutoff together
/// with an as-of-filtered run set replays the dashboard at that point in
/// time.
pub fn build_dashboard_metrics(
    now: i64,
    assets: &[AssetSnapshot],
    latest_runs: &[RunEvidence<'_>],
    counters: ActivityCounters,
) -> DashboardMetrics {
    // Inventory breakdown.
    let mut env_counts: Vec<(String, u64)> = Vec::new();
    let mut owned = 0u64;
    let mut in_scope = 0u64;
    for a in assets {
        let env = {
            let e = a.environment.trim();
            if e.is_empty() { "unspecified" } else { e }
        };
        match env_counts.iter_mut().find(|(name, _)| name == env) {
            Some((_, c)) => *c += 1,
            None => env_counts.push((env.to_string(), 1)),
        }
        if !a.owner.trim().is_empty() {
            owned += 1;
        }
        if a.tags.iter().any(|t| t.trim().eq_ignore_ascii_case("in-scope")) {
            in_scope += 1;
        }
    }
    env_counts.sort_by(|(an, ac), (bn, bc)| bc.cmp(ac).then_with(|| an.cmp(bn)));

    let asset_hosts: BTreeSet<String> = assets
        .iter()
        .map(|a| normalize_host(&a.value))
        .filter(|h| !h.is_empty())
        .collect();

    // Evidence scan.
    let cutoff_7d = now - 7 * DAY;
    let cutoff_30d = now - 30 * DAY;

    let mut latest_run_ts: Option<i64> = None;
    let mut scanned_7d: BTreeSet<String> = BTreeSet::new();
    let mut scanned_30d: BTreeSet<String> = BTreeSet::new();
    let mut findings_by_sev = SeverityHistogram::default();
    let mut open_ports_total = 0u64;

    for run in latest_runs {
        if run.ts > 0 && latest_run_ts.map_or(true, |t| run.ts > t) {
            latest_run_ts = Some(run.ts);
        }

        let host = parse_target(run.target).normalized_host();
        if !host.is_empty() {
            if run.ts >= cutoff_7d {
                scanned_7d.insert(host.clone());
            }
            if run.ts >= cutoff_30d {
                scanned_30d.insert(host);
            }
        }

        for f in run.findings {
            findings_by_sev.add(f.severity);
        }
        open_ports_total += exposure::extract_open_ports(run.results).len() as u64;
    }

    let risk_summary = summarize_open_ports_by_asset(
        latest_runs.iter().map(|r| (r.target, r.results)),
        latest_runs.len(),
    );
    let risk_points_total = risk_summary.total_risk_points();

    // Coverage counts only hosts that are both inventoried and scanned.
    let assets_scanned_7d = scanned_7d.intersection(&asset_hosts).count() as u64;
    let assets_scanned_30d = scanned_30d.intersection(&asset_hosts).count() as u64;

    let total_assets = assets.len() as u64;
    let coverage_7d_pct = pct(assets_scanned_7d, total_assets);
    let coverage_30d_pct = pct(assets_scanned_30d, total_assets);

    let score_categories = ScoreBreakdown {
        vulnerability: score_from_histogram(&findings_by_sev),
        exposure: score_exposure(risk_points_total, assets_scanned_30d),
        coverage: score_coverage(coverage_30d_pct),
        activity: score_activity(counters.runs_7d),
    };
    let score = weighted_score(&score_categories);

    DashboardMetrics {
        ts: now,
        total_assets,
        assets_by_env: env_counts,
        owner_coverage_pct: pct(owned, total_assets),
        in_scope_tag_pct: pct(in_scope, total_assets),
        total_runs: counters.total_runs,
        runs_24h: counters.runs_24h,
        runs_7d: counters.runs_7d,
        latest_run_ts,
        targets_seen: latest_runs.len() as u64,
        assets_scanned_7d,
        assets_scanned_30d,
        coverage_7d_pct,
        coverage_30d_pct,
        findings_by_sev,
        open_ports_total,
        risk_points_total,
        score,
        grade: letter_grade(score),
        score_categories,
        score_weights: ScoreBreakdown {
            vulnerability: WEIGHT_VULNERABILITY,
            exposure: WEIGHT_EXPOSURE,
            coverage: WEIGHT_COVERAGE,
            activity: WEIGHT_ACTIVITY,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset(value: &str, owner: &str, env: &str, tags: &[&str]) -> AssetSnapshot {
        AssetSnapshot {
            kind: "host".into(),
            value: value.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            owner: owner.into(),
            environment: env.into(),
        }
    }

    fn findings_with_severities(sevs: &[i64]) -> Vec<Finding> {
        sevs.iter()
            .map(|&s| Finding {
                asset: "a".into(),
                scanner: "c".into(),
                category: "c".into(),
                title: format!("f{s}"),
                severity: s,
                confidence: "unknown".into(),
                remediation: String::new(),
                details: String::new(),
                references: Vec::new(),
            })
            .collect()
    }

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn histogram_thresholds() {
        let mut h = SeverityHistogram::default();
        for s in [10, 9, 8, 7, 5, 4, 2, 1, 0] {
            h.add(s);
        }
        assert_eq!(h.critical, 2);
        assert_eq!(h.high, 2);
        assert_eq!(h.medium, 2);
        assert_eq!(h.low, 2);
        assert_eq!(h.info, 1);
    }

    #[test]
    fn is_pure() {
        let assets = vec![asset("a.example.com", "sre", "prod", &["in-scope"])];
        let results = json!({"Nmap Scan": {"\nOpen Ports": {"details": "80/tcp http\n"}}});
        let findings = findings_with_severities(&[7, 3]);
        let runs = vec![RunEvidence {
            id: 1,
            ts: NOW - 100,
            target: "a.example.com",
            results: &results,
            findings: &findings,
        }];
        let counters = ActivityCounters {
            total_runs: 5,
            runs_24h: 1,
            runs_7d: 3,
        };
        let m1 = build_dashboard_metrics(NOW, &assets, &runs, counters);
        let m2 = build_dashboard_metrics(NOW, &assets, &runs, counters);
        assert_eq!(m1, m2);
    }

    #[test]
    fn score_in_bounds_and_monotone_in_criticals() {
        let empty = json!({});
        let mut last = 101u32;
        for criticals in 0..8 {
            let findings = findings_with_severities(&vec![10; criticals]);
            let runs = vec![RunEvidence {
                id: 1,
                ts: NOW,
                target: "a",
                results: &empty,
                findings: &findings,
            }];
            let m = build_dashboard_metrics(NOW, &[], &runs, ActivityCounters::default());
            assert!(m.score <= 100);
            assert!(m.score <= last, "score rose as criticals rose");
            last = m.score;
        }
    }

    #[test]
    fn coverage_is_intersection_not_superset() {
        // Two assets, one scanned; one scanned host not in inventory.
        let assets = vec![
            asset("a.example.com", "", "", &[]),
            asset("b.example.com", "", "", &[]),
        ];
        let empty = json!({});
        let runs = vec![
            RunEvidence {
                id: 1,
                ts: NOW - DAY,
                target: "a.example.com",
                results: &empty,
                findings: &[],
            },
            RunEvidence {
                id: 2,
                ts: NOW - DAY,
                target: "stranger.example.net",
                results: &empty,
                findings: &[],
            },
        ];
        let m = build_dashboard_metrics(NOW, &assets, &runs, ActivityCounters::default());
        assert_eq!(m.assets_scanned_30d, 1);
        assert_eq!(m.coverage_30d_pct, 50);
        assert_eq!(m.targets_seen, 2);
    }

    #[test]
    fn stale_runs_fall_out_of_windows() {
        let assets = vec![asset("a.example.com", "", "", &[])];
        let empty = json!({});
        let runs = vec![RunEvidence {
            id: 1,
            ts: NOW - 10 * DAY,
            target: "a.example.com",
            results: &empty,
            findings: &[],
        }];
        let m = build_dashboard_metrics(NOW, &assets, &runs, ActivityCounters::default());
        assert_eq!(m.assets_scanned_7d, 0);
        assert_eq!(m.assets_scanned_30d, 1);
    }

    #[test]
    fn ownership_and_scope_percentages() {
        let assets = vec![
            asset("a", "alice", "prod", &["in-scope"]),
            asset("b", "", "prod", &[]),
            asset("c", "bob", "dev", &["In-Scope"]),
            asset("d", "", "", &[]),
        ];
        let m = build_dashboard_metrics(NOW, &assets, &[], ActivityCounters::default());
        assert_eq!(m.owner_coverage_pct, 50);
        assert_eq!(m.in_scope_tag_pct, 50);
        assert_eq!(m.assets_by_env[0], ("prod".to_string(), 2));
        assert!(m
            .assets_by_env
            .iter()
            .any(|(e, c)| e == "unspecified" && *c == 1));
    }

    #[test]
    fn weighted_score_uses_fixed_weights() {
        let categories = ScoreBreakdown {
            vulnerability: 100,
            exposure: 0,
            coverage: 0,
            activity: 0,
        };
        assert_eq!(weighted_score(&categories), 45);
    }

    #[test]
    fn grades() {
        assert_eq!(letter_grade(95), 'A');
        assert_eq!(letter_grade(90), 'A');
        assert_eq!(letter_grade(85), 'B');
        assert_eq!(letter_grade(72), 'C');
        assert_eq!(letter_grade(60), 'D');
        assert_eq!(letter_grade(10), 'F');
    }

    #[test]
    fn exposure_score_tiers() {
        assert_eq!(score_exposure(0, 10), 95);
        assert_eq!(score_exposure(10, 10), 88);
        assert_eq!(score_exposure(20, 10), 78);
        assert_eq!(score_exposure(40, 10), 62);
        assert_eq!(score_exposure(70, 10), 45);
        assert_eq!(score_exposure(71, 10), 30);
        // zero covered assets still divides by one
        assert_eq!(score_exposure(0, 0), 95);
    }
}
