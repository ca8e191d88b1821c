//! Stateful issue queue derived from stored evidence.
//!
//! Issues are keyed by fingerprint so repeated observations of the same
//! finding collapse into one record whose triage state survives rescans. The
//! only automatic transition is the reopen of a resolved issue that shows up
//! again in newer evidence; absence from the newest run never closes
//! anything.

use crate::{Db, IssueRecord, Observation, RunId};
use anyhow::Result;
use posture_core::{fingerprint, transition, IssueStatus, LifecycleDecision};
use rusqlite::{params, Connection, OptionalExtension};

const ISSUE_COLUMNS: &str = "fingerprint, asset, category, title, severity, status, owner, environment, \
     first_seen_ts, last_seen_ts, last_run_id, status_updated_ts, resolved_ts, reopened_count, \
     remediation, details";

impl Db {
    pub fn get_issue(&self, fp: &str) -> Result<Option<IssueRecord>> {
        get_issue_on(&self.conn, fp)
    }

    /// Record one observation of a finding, creating or refreshing its issue.
    ///
    /// The transition decision is computed from the pre-image inside a single
    /// transaction, so concurrent syncs cannot race an upsert into a double
    /// reopen. Evidence fields (severity, remediation, details, last seen,
    /// last run) always track the observation; triage fields (status, owner,
    /// environment, first seen) are preserved and only backfilled when empty.
    pub fn upsert_observation(&self, obs: &Observation, now: i64) -> Result<String> {
        let fp = fingerprint(&obs.asset, &obs.category, &obs.title);
        let tx = self.conn.unchecked_transaction()?;

        match get_issue_on(&tx, &fp)? {
            None => {
                tx.execute(
                    &format!("INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"),
                    params![
                        fp,
                        obs.asset,
                        obs.category,
                        obs.title,
                        obs.severity,
                        IssueStatus::Open.as_str(),
                        obs.owner,
                        obs.environment,
                        obs.last_seen_ts,
                        obs.last_seen_ts,
                        obs.last_run_id,
                        now,
                        0i64,
                        0i64,
                        obs.remediation,
                        obs.details,
                    ],
                )?;
            }
            Some(existing) => {
                let seen_again = obs.last_seen_ts > existing.last_seen_ts;
                let (status, status_updated_ts, resolved_ts, reopened_count) =
                    match transition(existing.status, seen_again) {
                        LifecycleDecision::Reopen => {
                            (IssueStatus::Open, now, 0, existing.reopened_count + 1)
                        }
                        LifecycleDecision::Keep => (
                            existing.status,
                            // backfill for records predating the field
                            if existing.status_updated_ts == 0 {
                                now
                            } else {
                                existing.status_updated_ts
                            },
                            existing.resolved_ts,
                            existing.reopened_count,
                        ),
                    };

                let owner = if existing.owner.is_empty() {
                    &obs.owner
                } else {
                    &existing.owner
                };
                let environment = if existing.environment.is_empty() {
                    &obs.environment
                } else {
                    &existing.environment
                };

                tx.execute(
                    "UPDATE issues SET severity=?, status=?, owner=?, environment=?, last_seen_ts=?, \
                     last_run_id=?, status_updated_ts=?, resolved_ts=?, reopened_count=?, \
                     remediation=?, details=? WHERE fingerprint=?",
                    params![
                        obs.severity,
                        status.as_str(),
                        owner,
                        environment,
                        obs.last_seen_ts,
                        obs.last_run_id,
                        status_updated_ts,
                        resolved_ts,
                        reopened_count,
                        obs.remediation,
                        obs.details,
                        fp,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(fp)
    }

    /// Manual triage update. Resolved statuses stamp `resolved_ts`; any other
    /// status clears it. Returns false when the fingerprint is unknown.
    pub fn update_issue_status(
        &self,
        fp: &str,
        status: Option<IssueStatus>,
        owner: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let mut touched = false;

        if let Some(status) = status {
            let resolved_ts = if status.is_resolved() { now } else { 0 };
            let n = self.conn.execute(
                "UPDATE issues SET status=?, status_updated_ts=?, resolved_ts=? WHERE fingerprint=?",
                params![status.as_str(), now, resolved_ts, fp],
            )?;
            touched |= n > 0;
        }

        if let Some(owner) = owner {
            let n = self.conn.execute(
                "UPDATE issues SET owner=? WHERE fingerprint=?",
                params![owner, fp],
            )?;
            touched |= n > 0;
        }

        Ok(touched)
    }

    /// Issues ordered by severity desc, then most recently seen.
    pub fn list_issues(
        &self,
        limit: usize,
        offset: usize,
        status: Option<IssueStatus>,
    ) -> Result<Vec<IssueRecord>> {
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues WHERE status=? \
                     ORDER BY severity DESC, last_seen_ts DESC LIMIT ? OFFSET ?"
                ))?;
                let rows = stmt.query_map(
                    params![s.as_str(), limit as i64, offset as i64],
                    row_to_issue,
                )?;
                for row in rows {
                    out.push(issue_from_row(row?)?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues \
                     ORDER BY severity DESC, last_seen_ts DESC LIMIT ? OFFSET ?"
                ))?;
                let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_issue)?;
                for row in rows {
                    out.push(issue_from_row(row?)?);
                }
            }
        }
        Ok(out)
    }

    pub fn count_issues(&self, status: Option<IssueStatus>) -> Result<i64> {
        let n = match status {
            Some(s) => self.conn.query_row(
                "SELECT COUNT(1) FROM issues WHERE status=?",
                params![s.as_str()],
                |r| r.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(1) FROM issues", [], |r| r.get(0))?,
        };
        Ok(n)
    }

    /// Idempotent sync driver: upsert one observation per stored finding of
    /// each latest-per-target run. Observations carry the run's timestamp, so
    /// re-running over unchanged evidence changes nothing and never reopens a
    /// resolved issue. Returns the number of observations applied.
    pub fn sync_issues_from_latest_runs(&self, limit: usize, now: i64) -> Result<u64> {
        let mut applied = 0u64;
        for meta in self.list_latest_per_target(limit)? {
            let Some(run) = self.get_run(meta.id)? else {
                continue;
            };
            let fallback_asset = posture_core::parse_target(&run.target).normalized_host();
            for f in &run.findings {
                let asset = if f.asset.is_empty() {
                    fallback_asset.clone()
                } else {
                    f.asset.clone()
                };
                self.upsert_observation(
                    &Observation {
                        asset,
                        category: f.category.clone(),
                        title: f.title.clone(),
                        severity: f.severity,
                        owner: String::new(),
                        environment: String::new(),
                        last_seen_ts: run.ts,
                        last_run_id: run.id,
                        remediation: f.remediation.clone(),
                        details: f.details.clone(),
                    },
                    now,
                )?;
                applied += 1;
            }
        }
        Ok(applied)
    }
}

type IssueRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    i64,
    i64,
    RunId,
    i64,
    i64,
    i64,
    String,
    String,
);

fn row_to_issue(r: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
        r.get(9)?,
        r.get(10)?,
        r.get(11)?,
        r.get(12)?,
        r.get(13)?,
        r.get(14)?,
        r.get(15)?,
    ))
}

fn issue_from_row(row: IssueRow) -> Result<IssueRecord> {
    let (
        fingerprint,
        asset,
        category,
        title,
        severity,
        status,
        owner,
        environment,
        first_seen_ts,
        last_seen_ts,
        last_run_id,
        status_updated_ts,
        resolved_ts,
        reopened_count,
        remediation,
        details,
    ) = row;
    Ok(IssueRecord {
        fingerprint,
        asset,
        category,
        title,
        severity,
        status: status.parse()?,
        owner,
        environment,
        first_seen_ts,
        last_seen_ts,
        last_run_id,
        status_updated_ts,
        resolved_ts,
        reopened_count,
        remediation,
        details,
    })
}

fn get_issue_on(conn: &Connection, fp: &str) -> Result<Option<IssueRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE fingerprint=?"),
            params![fp],
            row_to_issue,
        )
        .optional()?;
    match row {
        Some(r) => Ok(Some(issue_from_row(r)?)),
        None => Ok(None),
    }
}
