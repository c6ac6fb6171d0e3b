// src/bin/consolidate_branches.rs
//
// Branch cleanup: merges case-insensitive duplicate branches and prints the summary
// {success, duplicatesFound, duplicatesDeleted, consolidationMap} as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use dedupe_lib::consolidation::{BranchPolicy, DedupRunner};
use dedupe_lib::db::PgStore;
use dedupe_lib::models::{ConsolidationSummary, RunMode};
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::progress_config::ProgressConfig;
use dedupe_lib::utils::run_config::RunConfig;
use env_logger::Env;
use log::warn;

#[derive(Parser)]
#[command(author, version, about = "Merge duplicate branches and print a JSON summary", long_about = None)]
struct ConsolidateArgs {
    /// Only report the proposed consolidation map
    #[arg(long)]
    dry_run: bool,

    /// Apply the consolidation
    #[arg(long)]
    merge: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    load_env();

    let args = ConsolidateArgs::parse();
    let mode = match RunMode::from_flags(args.dry_run, args.merge) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    let config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    let pool = connect().await.context("Failed to connect to database")?;
    let store = PgStore::new(pool);
    if config.audit_enabled && !mode.is_dry_run() {
        store.ensure_audit_table().await?;
    }

    let runner = DedupRunner::new(&store, config).with_progress(ProgressConfig::disabled());
    let report = runner.run(&BranchPolicy, mode).await?;
    let summary = ConsolidationSummary::from(&report);

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );
    if !summary.success {
        warn!("{} branch clusters could not be merged", report.errors.len());
        std::process::exit(1);
    }
    Ok(())
}
