use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use dedupe_lib::consolidation::{BranchPolicy, DedupRunner, JobPolicy, SalesPersonPolicy};
use dedupe_lib::db::PgStore;
use dedupe_lib::models::{GroupStatus, RunMode, RunReport};
use dedupe_lib::utils::db_connect::{connect, get_pool_status};
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_config::ProgressConfig;
use dedupe_lib::utils::run_config::RunConfig;
use dedupe_lib::utils::scope_filter::ScopeFilter;
use env_logger::Env;
use log::{error, info, warn, LevelFilter};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EntityArg {
    Jobs,
    Branches,
    SalesPersons,
    All,
}

#[derive(Parser)]
#[command(author, version, about = "Find and consolidate duplicate jobs, branches and salespersons", long_about = None)]
struct DedupeArgs {
    /// Report what would be merged without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Apply merges, one transaction per duplicate cluster
    #[arg(long)]
    merge: bool,

    /// Which entity type to deduplicate
    #[arg(long, value_enum, default_value_t = EntityArg::All)]
    entity: EntityArg,

    /// Print the run reports as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Restrict job deduplication to these branches (repeatable)
    #[arg(long = "branch-id")]
    branch_ids: Vec<i64>,

    /// Override DEDUP_MAX_PASSES
    #[arg(long)]
    max_passes: Option<usize>,

    /// Enable debug logging (one line per planned row move)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DedupeArgs::parse();
    init_logging(args.verbose);
    load_env();

    // Usage and configuration problems stop the run before the database is touched.
    let mode = match RunMode::from_flags(args.dry_run, args.merge) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    let mut config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            std::process::exit(2);
        }
    };
    if let Some(max_passes) = args.max_passes {
        config.max_passes = max_passes;
    }
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {:#}", e);
        std::process::exit(2);
    }
    config.log_config();

    let scope_filter = ScopeFilter::from_env().with_branches(&args.branch_ids);
    scope_filter.log_config();

    let progress = if args.json {
        ProgressConfig::disabled()
    } else {
        ProgressConfig::from_env()
    };

    let start_time = Instant::now();
    let pool = connect().await.context("Failed to connect to database")?;
    let store = PgStore::new(pool.clone());
    if config.audit_enabled && !mode.is_dry_run() {
        store.ensure_audit_table().await?;
    }

    let runner = DedupRunner::new(&store, config.clone()).with_progress(progress);
    let mut reports: Vec<RunReport> = Vec::new();

    // Branches first so job and salesperson scopes already point at surviving branches.
    if matches!(args.entity, EntityArg::Branches | EntityArg::All) {
        reports.push(runner.run(&BranchPolicy, mode).await?);
    }
    if matches!(args.entity, EntityArg::Jobs | EntityArg::All) {
        let policy = JobPolicy::new(&config, scope_filter.clone());
        reports.push(runner.run(&policy, mode).await?);
    }
    if matches!(args.entity, EntityArg::SalesPersons | EntityArg::All) {
        let policy = SalesPersonPolicy::new(&config);
        reports.push(runner.run(&policy, mode).await?);
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialize run reports")?
        );
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    let (connections, idle) = get_pool_status(&pool);
    info!(
        "🏁 Finished in {:.2?} (pool: {} connections, {} idle)",
        start_time.elapsed(),
        connections,
        idle
    );

    let failed: usize = reports.iter().map(|r| r.errors.len()).sum();
    if failed > 0 {
        error!("{} clusters failed to merge and were rolled back", failed);
        bail!("{} clusters failed to merge", failed);
    }
    Ok(())
}

/// `--verbose` forces debug output, including one line per planned row move.
fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn print_report(report: &RunReport) {
    println!(
        "== {} ({}) run {} ==",
        report.kind.table(),
        report.mode,
        report.run_id
    );
    for group in &report.groups {
        let status = match &group.status {
            GroupStatus::Planned => "planned".to_string(),
            GroupStatus::Merged { .. } => "merged".to_string(),
            GroupStatus::Failed { error } => format!("FAILED: {}", error),
        };
        let members: Vec<String> = group
            .members
            .iter()
            .map(|m| format!("{} \"{}\"", m.id, m.name))
            .collect();
        println!(
            "  keep {} <- [{}] ({})",
            group.canonical_id,
            members.join(", "),
            status
        );
        for action in &group.plan.actions {
            println!("      {}", action.describe());
        }
    }
    println!(
        "  groups: {}, merged: {}, deleted: {}, failed: {}, passes: {}{}",
        report.groups_found,
        report.merged_count,
        report.deleted_count,
        report.errors.len(),
        report.passes,
        if report.converged { "" } else { " (not converged)" }
    );
    if report.mode == RunMode::DryRun && report.groups_found > 0 {
        warn!("Dry run only: re-run with --merge to apply these changes");
    }
}
