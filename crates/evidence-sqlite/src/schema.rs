pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE runs (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  ts              INTEGER NOT NULL,
  target          TEXT NOT NULL,
  scans_json      TEXT NOT NULL,
  results_json    TEXT NOT NULL,
  findings_json   TEXT NOT NULL
);

CREATE TABLE issues (
  fingerprint       TEXT PRIMARY KEY,
  asset             TEXT NOT NULL,
  category          TEXT NOT NULL,
  title             TEXT NOT NULL,
  severity          INTEGER NOT NULL,
  status            TEXT NOT NULL CHECK (status IN ('open','triaged','in_progress','fixed','accepted','false_positive')),
  owner             TEXT NOT NULL DEFAULT '',
  environment       TEXT NOT NULL DEFAULT '',
  first_seen_ts     INTEGER NOT NULL,
  last_seen_ts      INTEGER NOT NULL,
  last_run_id       INTEGER NOT NULL,
  status_updated_ts INTEGER NOT NULL DEFAULT 0,
  resolved_ts       INTEGER NOT NULL DEFAULT 0,
  reopened_count    INTEGER NOT NULL DEFAULT 0,
  remediation       TEXT NOT NULL DEFAULT '',
  details           TEXT NOT NULL DEFAULT ''
);

CREATE TABLE assets (
  asset_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  ts              INTEGER NOT NULL,
  kind            TEXT NOT NULL CHECK (kind IN ('host','ip','url','cidr')),
  value           TEXT NOT NULL,
  tags            TEXT NOT NULL DEFAULT '',
  owner           TEXT NOT NULL DEFAULT '',
  environment     TEXT NOT NULL DEFAULT '',
  UNIQUE (kind, value)
);

CREATE INDEX idx_runs_target ON runs(target, id);
CREATE INDEX idx_runs_ts ON runs(ts);
CREATE INDEX idx_issues_status ON issues(status);
CREATE INDEX idx_issues_order ON issues(severity DESC, last_seen_ts DESC);
CREATE INDEX idx_assets_value ON assets(value);

COMMIT;
"#;
