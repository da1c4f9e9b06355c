use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use wiki_pageviews::config::Config;
use wiki_pageviews::constants::TABLE_NAME;
use wiki_pageviews::pipeline::{Pipeline, RunOutcome};
use wiki_pageviews::snapshot::SnapshotAddress;
use wiki_pageviews::{journal, logging, metrics, schema, store, verify};

#[derive(Parser)]
#[command(name = "wiki_pageviews")]
#[command(about = "Hourly Wikimedia pageviews loader")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $PAGEVIEWS_CONFIG, then ./pageviews.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, parse and load one hourly snapshot
    Run {
        /// Treat this RFC 3339 instant as the current time
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Create or check the destination table
    Schema,
    /// Print the number of rows in the destination table
    Count,
    /// Print the snapshot URL and staging path a run would use
    Address {
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging(&logging::log_dir_from_env());

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run { at } => run(&config, at.unwrap_or_else(Utc::now)).await,
        Commands::Schema => {
            let store = store::open(&config.store).await?;
            schema::ensure_schema(store.as_ref()).await?;
            println!("✅ {} is ready", TABLE_NAME);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Count => {
            let store = store::open(&config.store).await?;
            let v = verify::verify(store.as_ref(), 0).await?;
            println!("📊 {} rows in {}", v.total_rows, TABLE_NAME);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Address { at } => {
            let address = SnapshotAddress::resolve(at.unwrap_or_else(Utc::now), &config.source);
            println!("🕐 Window:  {}", address.window);
            println!("🌐 URL:     {}", address.url);
            println!("📁 Staging: {}", address.staging_path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: &Config, now: DateTime<Utc>) -> anyhow::Result<ExitCode> {
    if let Err(e) = metrics::init_metrics() {
        warn!("Metrics disabled: {:#}", e);
    }

    let pipeline = Pipeline::from_config(config).context("failed to build HTTP client")?;
    let store = store::open(&config.store).await?;
    let report = pipeline.run(now, store.as_ref()).await;

    println!("\n📊 Run {} for {}:", report.run_id, report.window);
    println!("   Reached:      {}", report.reached);
    println!("   Rows parsed:  {}", report.rows_parsed);
    println!("   Rows loaded:  {}", report.rows_loaded);
    if let Some(total) = report.total_rows {
        println!("   Total rows:   {}", total);
    }
    println!("   Cleaned up:   {}", report.cleaned_up);
    match &report.outcome {
        RunOutcome::Succeeded => println!("✅ Succeeded"),
        RunOutcome::Skipped { existing_rows } => {
            println!("⏭️  Skipped ({} rows already loaded)", existing_rows)
        }
        RunOutcome::Degraded { error } => println!("⚠️  Degraded: {}", error),
        RunOutcome::Failed { stage, error } => println!("❌ Failed at {}: {}", stage, error),
    }

    match journal::append_rotating(&config.journal_dir, &report) {
        Ok(path) => info!("Run journal written to {}", path.display()),
        Err(e) => error!("Failed to write run journal: {:#}", e),
    }

    if let Ok(gateway) = std::env::var(metrics::PUSHGATEWAY_ENV) {
        if let Err(e) = metrics::push_to_pushgateway(&gateway, &report.window.to_string()).await {
            warn!("Failed to push metrics: {:#}", e);
        }
    }

    Ok(if report.outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
