use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use importer::config::Config;
use importer::db;
use importer::model::ElectionType;
use importer::orchestrator::{dry_run, ImportSettings, Importer};
use importer::source::{discover_plan, load_plan};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports historical electoral results into PostgreSQL")]
struct Args {
    /// Directory holding electorado.csv and {electionType}{year}.csv files (overrides DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON import plan listing the files explicitly
    #[arg(long, conflicts_with = "data_dir")]
    plan: Option<PathBuf>,

    /// Electorate file to use instead of the planned one
    #[arg(long)]
    electorate: Option<PathBuf>,

    /// Only import these years (repeatable)
    #[arg(long = "year")]
    years: Vec<i32>,

    /// Only import these election types (municipal, state_legislature, governor)
    #[arg(long = "election-type")]
    election_types: Vec<ElectionType>,

    /// Dry run - parse and aggregate, don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Keep existing rows instead of truncating each phase
    #[arg(long, default_value = "false")]
    keep_existing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = if args.dry_run {
        // No database needed; DB_URL may be absent
        Config::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| (key == "DB_URL").then(String::new))
        })?
    } else {
        Config::from_env()?
    };

    let mut plan = match &args.plan {
        Some(path) => load_plan(path).await.context("Failed to load import plan")?,
        None => {
            let data_dir = args.data_dir.clone().unwrap_or_else(|| config.data_dir.clone());
            discover_plan(&data_dir).await.context("Failed to scan data directory")?
        }
    };
    if let Some(electorate) = &args.electorate {
        plan.electorate = electorate.clone();
    }
    plan.retain(&args.years, &args.election_types);

    let settings = ImportSettings {
        state: plan.state.clone().unwrap_or_else(|| config.state_name.clone()),
        electorate_policy: config.electorate_policy,
        results_policy: config.results_policy,
        keep_existing: args.keep_existing,
    };

    println!("=== Guardianes Historical Results Importer ===");
    println!("State: {}", settings.state);
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });
    println!("Electorate: {}", plan.electorate.display());
    println!("Results files: {}", plan.results.len());
    println!(
        "Row policy: electorate={} results={}",
        settings.electorate_policy, settings.results_policy
    );

    let started = Utc::now();
    let summary = if args.dry_run {
        dry_run(&plan, &settings).await?
    } else {
        let pool = db::connect(&config.db_url, config.max_connections)
            .await
            .context("Failed to connect to database")?;
        let mut importer = Importer::new(pool, settings);
        importer.import_all(&plan).await?
    };
    let elapsed = Utc::now() - started;

    summary.print();
    info!("Finished in {} ms", elapsed.num_milliseconds());

    let failed = summary.failed();
    if failed > 0 {
        bail!("{} file(s) failed to import", failed);
    }
    Ok(())
}
