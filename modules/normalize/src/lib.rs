//! Flatten raw scanner output into uniform [`Finding`] records.
//!
//! Raw results arrive as `category -> title -> {severity, remediation,
//! details, confidence?, references?}` maps, but scanners are sloppy: leaves
//! can be bare scalars, severities can be strings, references can be a single
//! string. Normalization never fails; anything malformed degrades to safe
//! defaults so one bad scanner cannot poison a run.

use posture_core::finding::{clamp_severity, Finding};
use serde_json::Value;

/// Produce exactly one [`Finding`] per leaf of the raw results map.
///
/// A non-object value under a category becomes a single placeholder finding
/// titled "(value)" with severity 0 and the stringified leaf as details.
pub fn normalize_findings(results: &Value, asset: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    let Some(categories) = results.as_object() else {
        return findings;
    };

    for (category, items) in categories {
        let Some(entries) = items.as_object() else {
            findings.push(Finding {
                asset: asset.to_string(),
                scanner: category.clone(),
                category: category.clone(),
                title: "(value)".to_string(),
                severity: 0,
                confidence: "unknown".to_string(),
                remediation: String::new(),
                details: stringify(items),
                references: Vec::new(),
            });
            continue;
        };

        for (title, det) in entries {
            let finding = match det.as_object() {
                Some(d) => Finding {
                    asset: asset.to_string(),
                    scanner: category.clone(),
                    category: category.clone(),
                    title: title.clone(),
                    severity: coerce_severity(d.get("severity")),
                    confidence: d
                        .get("confidence")
                        .map(stringify)
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| "unknown".to_string()),
                    remediation: d.get("remediation").map(stringify).unwrap_or_default(),
                    details: d.get("details").map(stringify).unwrap_or_default(),
                    references: coerce_references(d.get("references")),
                },
                None => Finding {
                    asset: asset.to_string(),
                    scanner: category.clone(),
                    category: category.clone(),
                    title: title.clone(),
                    severity: 0,
                    confidence: "unknown".to_string(),
                    remediation: String::new(),
                    details: stringify(det),
                    references: Vec::new(),
                },
            };
            findings.push(finding);
        }
    }

    findings
}

/// Numeric severities pass through (clamped to 0-10); well-known strings map
/// to fixed values; anything unparseable degrades to 0.
fn coerce_severity(sev: Option<&Value>) -> i64 {
    match sev {
        Some(Value::Number(n)) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
            clamp_severity(raw.unwrap_or(0))
        }
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "info" => 0,
            "low" => 3,
            "medium" => 5,
            "high" => 7,
            "critical" => 10,
            other => other.parse::<i64>().map(clamp_severity).unwrap_or(0),
        },
        _ => 0,
    }
}

fn coerce_references(refs: Option<&Value>) -> Vec<String> {
    match refs {
        Some(Value::Array(items)) => items.iter().map(stringify).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_finding_per_leaf() {
        let results = json!({
            "Web Checks": {
                "Header missing": {"severity": 5, "remediation": "Add header", "details": "x"},
                "Cookie flags": {"severity": 3}
            },
            "Nmap Scan": {
                "Open Ports": {"severity": 0, "details": "22/tcp ssh"}
            }
        });
        let findings = normalize_findings(&results, "example.com");
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.asset == "example.com"));
        assert!(findings.iter().all(|f| (0..=10).contains(&f.severity)));
    }

    #[test]
    fn scanner_matches_category() {
        let results = json!({"Web Checks": {"Header missing": {"severity": 5}}});
        let findings = normalize_findings(&results, "example.com");
        assert_eq!(findings[0].scanner, "Web Checks");
        assert_eq!(findings[0].category, "Web Checks");
    }

    #[test]
    fn scalar_category_becomes_value_finding() {
        let results = json!({"Raw Banner": "SSH-2.0-OpenSSH_9.6"});
        let findings = normalize_findings(&results, "h");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title, "(value)");
        assert_eq!(findings[0].severity, 0);
        assert_eq!(findings[0].details, "SSH-2.0-OpenSSH_9.6");
    }

    #[test]
    fn scalar_leaf_becomes_zero_severity_finding() {
        let results = json!({"Info": {"Uptime": 12345}});
        let findings = normalize_findings(&results, "h");
        assert_eq!(findings[0].severity, 0);
        assert_eq!(findings[0].details, "12345");
    }

    #[test]
    fn string_severities_map() {
        for (s, want) in [
            ("info", 0),
            ("LOW", 3),
            ("Medium", 5),
            ("high", 7),
            ("critical", 10),
            ("whatever", 0),
        ] {
            let results = json!({"c": {"t": {"severity": s}}});
            assert_eq!(normalize_findings(&results, "a")[0].severity, want, "{s}");
        }
    }

    #[test]
    fn numeric_severity_is_clamped() {
        let results = json!({"c": {"t": {"severity": 99}}});
        assert_eq!(normalize_findings(&results, "a")[0].severity, 10);
        let results = json!({"c": {"t": {"severity": -4}}});
        assert_eq!(normalize_findings(&results, "a")[0].severity, 0);
    }

    #[test]
    fn references_accept_string_or_list() {
        let results = json!({"c": {"t": {"severity": 1, "references": "https://x"}}});
        assert_eq!(
            normalize_findings(&results, "a")[0].references,
            vec!["https://x"]
        );
        let results = json!({"c": {"t": {"severity": 1, "references": ["a", "b"]}}});
        assert_eq!(normalize_findings(&results, "a")[0].references.len(), 2);
        let results = json!({"c": {"t": {"severity": 1}}});
        assert!(normalize_findings(&results, "a")[0].references.is_empty());
    }

    #[test]
    fn missing_fields_default() {
        let results = json!({"c": {"t": {"severity": 2}}});
        let f = &normalize_findings(&results, "a")[0];
        assert_eq!(f.confidence, "unknown");
        assert!(f.remediation.is_empty());
        assert!(f.details.is_empty());
    }

    #[test]
    fn non_object_input_yields_nothing() {
        assert!(normalize_findings(&json!([1, 2]), "a").is_empty());
        assert!(normalize_findings(&json!(null), "a").is_empty());
    }
}
