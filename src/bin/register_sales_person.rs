// src/bin/register_sales_person.rs
//
// Registers a salesperson by name, reusing an active record when one already matches.

use anyhow::{Context, Result};
use clap::Parser;
use dedupe_lib::consolidation::register_sales_person;
use dedupe_lib::db::PgStore;
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::run_config::RunConfig;
use env_logger::Env;
use log::info;

#[derive(Parser)]
#[command(author, version, about = "Resolve a salesperson name to an existing record or create one", long_about = None)]
struct RegisterArgs {
    /// Display name as entered
    #[arg(long)]
    name: String,

    /// Telegram account id, stored only when a new record is created
    #[arg(long)]
    telegram_id: Option<String>,

    /// Branch to associate (only if the resolved record has no branch yet)
    #[arg(long)]
    branch_id: Option<i64>,

    /// Override DEDUP_SALES_PERSON_REGISTRATION_THRESHOLD (0-1)
    #[arg(long)]
    threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    load_env();

    let args = RegisterArgs::parse();
    let mut config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            std::process::exit(2);
        }
    };
    if let Some(threshold) = args.threshold {
        config.registration_threshold = threshold;
    }
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {:#}", e);
        std::process::exit(2);
    }

    let pool = connect().await.context("Failed to connect to database")?;
    let store = PgStore::new(pool);

    let outcome = register_sales_person(
        &store,
        &args.name,
        args.telegram_id.as_deref(),
        args.branch_id,
        config.registration_threshold,
    )
    .await?;

    info!(
        "Salesperson {} {}",
        outcome.sales_person_id,
        if outcome.created { "created" } else { "reused" }
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
    );
    Ok(())
}
