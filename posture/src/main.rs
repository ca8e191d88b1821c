use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use dashboard::{ActivityCounters, AssetSnapshot, RunEvidence};
use evidence_sqlite::{Db, StoredRun};
use posture_core::{now_ts, parse_target, IssueStatus};

mod config;

const DAY: i64 = 24 * 3600;

fn ts_rfc3339(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Debug, Parser)]
#[command(name = "posture", version, about = "Attack-surface evidence store, issue queue, and posture scoring")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./posture.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Evidence database path (default: ./posture.db, or the config value)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Store one raw scan result file as an immutable run
    Ingest {
        /// Target the results were produced for (host, URL, IP, or CIDR)
        target: String,
        /// JSON file with raw scanner results (category -> title -> record)
        results: PathBuf,
        /// Comma-separated scan ids that produced the results
        #[arg(long)]
        scans: Option<String>,
    },
    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        cmd: RunsCmd,
    },
    /// Diff the two most recent runs of a target
    Diff {
        target: String,
        /// How many recent runs to consider (the two newest are diffed)
        #[arg(long, default_value_t = 2)]
        last: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Manage the issue queue derived from stored evidence
    Issues {
        #[command(subcommand)]
        cmd: IssuesCmd,
    },
    /// Open-port exposure summary across the latest run per target
    Ports {
        /// Maximum targets to aggregate
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Posture dashboard: inventory, coverage, severity histogram, score
    Dashboard {
        /// Replay the dashboard as of a unix timestamp instead of now
        #[arg(long)]
        as_of: Option<i64>,
        /// Maximum targets to aggregate
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Subcommand)]
enum RunsCmd {
    /// List stored runs, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show one run's full payload as JSON
    Show { id: i64 },
    /// List runs for one exact target, newest first
    ForTarget {
        target: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List the newest run per target, optionally as of a cutoff
    Latest {
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        as_of: Option<i64>,
    },
    /// Best-effort host match over stored targets
    MatchHost {
        host: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
enum IssuesCmd {
    /// Upsert issues from the latest run per target
    Sync {
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
    /// List issues, highest severity and most recently seen first
    List {
        #[arg(long, default_value_t = 30)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Filter: open|triaged|in_progress|fixed|accepted|false_positive
        #[arg(long)]
        status: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Set status and/or owner for one issue by fingerprint
    Set {
        fingerprint: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref()).unwrap_or_default();

    let db_path = cli
        .db
        .clone()
        .or(cfg.db.clone())
        .unwrap_or_else(|| PathBuf::from("posture.db"));

    match cli.command {
        Commands::Version => {
            println!("posture {}", posture_core::version());
            Ok(())
        }
        Commands::Ingest { target, results, scans } => {
            let db = Db::open_or_create(&db_path)?;
            cmd_ingest(&db, &target, &results, scans.as_deref())
        }
        Commands::Runs { cmd } => {
            let db = Db::open_or_create(&db_path)?;
            cmd_runs(&db, cmd)
        }
        Commands::Diff { target, last, format } => {
            let db = Db::open_or_create(&db_path)?;
            cmd_diff(&db, &target, last, format)
        }
        Commands::Issues { cmd } => {
            let db = Db::open_or_create(&db_path)?;
            cmd_issues(&db, cmd)
        }
        Commands::Ports { limit, format } => {
            let db = Db::open_or_create(&db_path)?;
            cmd_ports(&db, limit, format)
        }
        Commands::Dashboard { as_of, limit, format } => {
            let db = Db::open_or_create(&db_path)?;
            cmd_dashboard(&db, as_of, limit, format)
        }
    }
}

fn cmd_ingest(db: &Db, target: &str, results_path: &PathBuf, scans: Option<&str>) -> Result<()> {
    let raw = fs::read_to_string(results_path)
        .with_context(|| format!("reading {}", results_path.display()))?;
    let results: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| "parsing results JSON")?;

    let asset = parse_target(target).normalized_host();
    let findings = normalize::normalize_findings(&results, &asset);

    let scan_ids: Vec<String> = scans
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let id = db.store_run(target, &scan_ids, &results, &findings, now_ts())?;
    println!("stored run #{id} ({} findings)", findings.len());
    Ok(())
}

fn print_meta(m: &evidence_sqlite::RunMeta) {
    let scans = if m.scans.is_empty() { String::new() } else { format!("  [{}]", m.scans.join(",")) };
    println!("#{}  {}  {}{}", m.id, ts_rfc3339(m.ts), m.target, scans);
}

fn cmd_runs(db: &Db, cmd: RunsCmd) -> Result<()> {
    match cmd {
        RunsCmd::List { limit, offset } => {
            for m in db.list_runs(limit, offset)? {
                print_meta(&m);
            }
        }
        RunsCmd::Show { id } => match db.get_run(id)? {
            Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
            None => return Err(anyhow!("run #{id} not found")),
        },
        RunsCmd::ForTarget { target, limit } => {
            for m in db.list_runs_for_target(&target, limit)? {
                print_meta(&m);
            }
        }
        RunsCmd::Latest { limit, as_of } => {
            let metas = match as_of {
                Some(cutoff) => db.list_latest_per_target_as_of(cutoff, limit)?,
                None => db.list_latest_per_target(limit)?,
            };
            for m in metas {
                print_meta(&m);
            }
        }
        RunsCmd::MatchHost { host, limit } => {
            for m in db.list_runs_matching_host(&host, limit)? {
                print_meta(&m);
            }
        }
    }
    Ok(())
}

fn cmd_diff(db: &Db, target: &str, last: usize, format: OutputFormat) -> Result<()> {
    let runs = db.list_runs_for_target(target, last.max(2))?;
    if runs.len() < 2 {
        return Err(anyhow!("not enough stored runs to diff (need at least 2)"));
    }

    let new_run = db
        .get_run(runs[0].id)?
        .ok_or_else(|| anyhow!("run #{} vanished", runs[0].id))?;
    let old_run = db
        .get_run(runs[1].id)?
        .ok_or_else(|| anyhow!("run #{} vanished", runs[1].id))?;

    let diff = diffing::DiffResult::build(
        target,
        old_run.id,
        new_run.id,
        &old_run.findings,
        &new_run.findings,
        &old_run.results,
        &new_run.results,
    );

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    println!("Diff target: {target}");
    println!("Old run: #{}  New run: #{}", diff.old_run_id, diff.new_run_id);
    println!();

    if !diff.exposure.is_empty() {
        println!("Exposure changes:");
        for p in &diff.exposure.added_ports {
            println!("+ port {p}");
        }
        for p in &diff.exposure.removed_ports {
            println!("- port {p}");
        }
        if let Some(sh) = &diff.exposure.server_header {
            println!(
                "~ server header: {} -> {}",
                sh.old.as_deref().unwrap_or("(none)"),
                sh.new.as_deref().unwrap_or("(none)")
            );
        }
        println!();
    }

    println!("New findings: {}", diff.new_findings.len());
    for f in &diff.new_findings {
        println!("+ [{}] {} :: {}", f.severity, f.category, f.title);
    }
    println!();
    println!("Resolved findings: {}", diff.resolved_findings.len());
    for f in &diff.resolved_findings {
        println!("- [{}] {} :: {}", f.severity, f.category, f.title);
    }
    Ok(())
}

fn parse_status(s: &str) -> Result<IssueStatus> {
    s.parse::<IssueStatus>().map_err(|e| anyhow!(e))
}

fn cmd_issues(db: &Db, cmd: IssuesCmd) -> Result<()> {
    match cmd {
        IssuesCmd::Sync { limit } => {
            let n = db.sync_issues_from_latest_runs(limit, now_ts())?;
            println!("synced {n} observations, {} issues total", db.count_issues(None)?);
        }
        IssuesCmd::List { limit, offset, status, format } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let issues = db.list_issues(limit, offset, status)?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&issues)?);
                return Ok(());
            }
            for i in &issues {
                let owner = if i.owner.is_empty() { String::new() } else { format!("  owner={}", i.owner) };
                println!(
                    "[{}] {}  {} :: {}  ({}, seen {}){}",
                    i.severity,
                    &i.fingerprint[..12.min(i.fingerprint.len())],
                    i.category,
                    i.title,
                    i.status,
                    ts_rfc3339(i.last_seen_ts),
                    owner
                );
            }
        }
        IssuesCmd::Set { fingerprint, status, owner } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            if status.is_none() && owner.is_none() {
                return Err(anyhow!("nothing to update: pass --status and/or --owner"));
            }
            let found = db.update_issue_status(&fingerprint, status, owner.as_deref(), now_ts())?;
            if !found {
                return Err(anyhow!("no issue with fingerprint {fingerprint}"));
            }
            println!("updated {fingerprint}");
        }
    }
    Ok(())
}

fn load_latest_details(db: &Db, metas: &[evidence_sqlite::RunMeta]) -> Result<Vec<StoredRun>> {
    let mut details = Vec::with_capacity(metas.len());
    for m in metas {
        if let Some(run) = db.get_run(m.id)? {
            details.push(run);
        }
    }
    Ok(details)
}

fn cmd_ports(db: &Db, limit: usize, format: OutputFormat) -> Result<()> {
    let metas = db.list_latest_per_target(limit)?;
    let details = load_latest_details(db, &metas)?;
    let summary = exposure::summarize_open_ports_by_asset(
        details.iter().map(|r| (r.target.as_str(), &r.results)),
        limit,
    );

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    // highest risk first
    let mut rows: Vec<_> = summary.risk_points_by_port.iter().collect();
    rows.sort_by(|(ap, ar), (bp, br)| br.cmp(ar).then_with(|| ap.cmp(bp)));
    for (port, risk) in rows {
        println!(
            "{port}  assets={}  risk_points={risk}",
            summary.counts_by_port.get(port).copied().unwrap_or(0)
        );
    }
    Ok(())
}

fn cmd_dashboard(db: &Db, as_of: Option<i64>, limit: usize, format: OutputFormat) -> Result<()> {
    let now = now_ts();

    // Live reads refresh the issue queue first; historical replays leave
    // triage state alone.
    if as_of.is_none() {
        db.sync_issues_from_latest_runs(limit, now)?;
    }

    let cutoff = as_of.unwrap_or(now);
    let metas = match as_of {
        Some(c) => db.list_latest_per_target_as_of(c, limit)?,
        None => db.list_latest_per_target(limit)?,
    };
    let details = load_latest_details(db, &metas)?;

    let assets: Vec<AssetSnapshot> = db
        .list_assets(limit, 0)?
        .into_iter()
        .map(|a| AssetSnapshot {
            kind: a.kind,
            value: a.value,
            tags: a.tags,
            owner: a.owner,
            environment: a.environment,
        })
        .collect();

    // Window counters relative to the cutoff, derived from count-since.
    let after_cutoff = db.count_runs_since(cutoff + 1)?;
    let counters = ActivityCounters {
        total_runs: (db.count_runs()? - after_cutoff).max(0) as u64,
        runs_24h: (db.count_runs_since(cutoff - DAY)? - after_cutoff).max(0) as u64,
        runs_7d: (db.count_runs_since(cutoff - 7 * DAY)? - after_cutoff).max(0) as u64,
    };

    let evidence: Vec<RunEvidence<'_>> = details
        .iter()
        .map(|r| RunEvidence {
            id: r.id,
            ts: r.ts,
            target: &r.target,
            results: &r.results,
            findings: &r.findings,
        })
        .collect();

    let metrics = dashboard::build_dashboard_metrics(cutoff, &assets, &evidence, counters);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!("Posture dashboard ({})", ts_rfc3339(metrics.ts));
    println!();
    println!("Score: {} ({})", metrics.score, metrics.grade);
    println!(
        "  vulnerability={}  exposure={}  coverage={}  activity={}",
        metrics.score_categories.vulnerability,
        metrics.score_categories.exposure,
        metrics.score_categories.coverage,
        metrics.score_categories.activity
    );
    println!();
    println!(
        "Assets: {}  (owner coverage {}%, in-scope {}%)",
        metrics.total_assets, metrics.owner_coverage_pct, metrics.in_scope_tag_pct
    );
    for (env, count) in &metrics.assets_by_env {
        println!("  {env}: {count}");
    }
    println!();
    println!(
        "Runs: {} total, {} in 24h, {} in 7d; {} targets seen",
        metrics.total_runs, metrics.runs_24h, metrics.runs_7d, metrics.targets_seen
    );
    if let Some(ts) = metrics.latest_run_ts {
        println!("Latest run: {}", ts_rfc3339(ts));
    }
    println!(
        "Coverage: {}% (7d), {}% (30d)",
        metrics.coverage_7d_pct, metrics.coverage_30d_pct
    );
    println!();
    let h = &metrics.findings_by_sev;
    println!(
        "Findings: critical={} high={} medium={} low={} info={}",
        h.critical, h.high, h.medium, h.low, h.info
    );
    println!(
        "Exposure: {} open ports, {} risk points",
        metrics.open_ports_total, metrics.risk_points_total
    );
    Ok(())
}
