//! Append-only run history. Runs are immutable evidence snapshots: stored
//! once, never updated, never deleted.

use crate::{Db, RunId, RunMeta, StoredRun};
use anyhow::Result;
use posture_core::target::{normalize_host, parse_target};
use posture_core::Finding;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

impl Db {
    /// Append one run and return its store-assigned id. Ids are strictly
    /// increasing; the insert is a single statement, so a run is either fully
    /// visible or absent.
    pub fn store_run(
        &self,
        target: &str,
        scans: &[String],
        results: &Value,
        findings: &[Finding],
        now: i64,
    ) -> Result<RunId> {
        self.conn.execute(
            "INSERT INTO runs (ts, target, scans_json, results_json, findings_json) VALUES (?,?,?,?,?)",
            params![
                now,
                target,
                serde_json::to_string(scans)?,
                serde_json::to_string(results)?,
                serde_json::to_string(findings)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Full payload for one run, or None when the id was never assigned.
    pub fn get_run(&self, id: RunId) -> Result<Option<StoredRun>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, ts, target, scans_json, results_json, findings_json FROM runs WHERE id=?",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, ts, target, scans, results, findings)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredRun {
            id,
            ts,
            target,
            scans: serde_json::from_str(&scans)?,
            results: serde_json::from_str(&results)?,
            findings: serde_json::from_str(&findings)?,
        }))
    }

    /// Run metadata, newest first.
    pub fn list_runs(&self, limit: usize, offset: usize) -> Result<Vec<RunMeta>> {
        self.meta_query(
            "SELECT id, ts, target, scans_json FROM runs ORDER BY id DESC LIMIT ? OFFSET ?",
            params![limit as i64, offset as i64],
        )
    }

    /// Metadata for one target's runs, newest first.
    pub fn list_runs_for_target(&self, target: &str, limit: usize) -> Result<Vec<RunMeta>> {
        self.meta_query(
            "SELECT id, ts, target, scans_json FROM runs WHERE target=? ORDER BY id DESC LIMIT ?",
            params![target, limit as i64],
        )
    }

    /// One row per target: its newest run, ordered newest first.
    pub fn list_latest_per_target(&self, limit: usize) -> Result<Vec<RunMeta>> {
        self.meta_query(
            "SELECT id, ts, target, scans_json FROM runs
             WHERE id IN (SELECT MAX(id) FROM runs GROUP BY target)
             ORDER BY id DESC LIMIT ?",
            params![limit as i64],
        )
    }

    /// Latest run per target considering only evidence at or before `cutoff`.
    /// This is what makes historical trend replay possible without separate
    /// trend storage.
    pub fn list_latest_per_target_as_of(&self, cutoff: i64, limit: usize) -> Result<Vec<RunMeta>> {
        self.meta_query(
            "SELECT id, ts, target, scans_json FROM runs
             WHERE id IN (SELECT MAX(id) FROM runs WHERE ts <= ? GROUP BY target)
             ORDER BY id DESC LIMIT ?",
            params![cutoff, limit as i64],
        )
    }

    pub fn count_runs(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(1) FROM runs", [], |r| r.get(0))?)
    }

    pub fn count_runs_since(&self, cutoff: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(1) FROM runs WHERE ts >= ?",
            params![cutoff],
            |r| r.get(0),
        )?)
    }

    /// Best-effort host match over stored targets, newest first. Targets are
    /// often stored as full URLs, so the query host and each stored target's
    /// normalized host are compared by containment in either direction. A
    /// miss is an empty list, never an error.
    pub fn list_runs_matching_host(&self, host: &str, limit: usize) -> Result<Vec<RunMeta>> {
        let query = normalize_host(host);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, ts, target, scans_json FROM runs ORDER BY id DESC")?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ts, target, scans) = row?;
            let stored = parse_target(&target).normalized_host();
            if stored.is_empty() {
                continue;
            }
            if stored == query || stored.contains(&query) || query.contains(&stored) {
                out.push(RunMeta {
                    id,
                    ts,
                    target,
                    scans: serde_json::from_str(&scans).unwrap_or_default(),
                });
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn meta_query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<RunMeta>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ts, target, scans) = row?;
            out.push(RunMeta {
                id,
                ts,
                target,
                scans: serde_json::from_str(&scans).unwrap_or_default(),
            });
        }
        Ok(out)
    }
}
