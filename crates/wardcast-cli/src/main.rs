use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use wardcast_storage::PgStore;
use wardcast_sync::{run_sync, RunConfig};

#[derive(Debug, Parser)]
#[command(name = "wardcast")]
#[command(about = "Fetch ward forecasts and alerts from WeatherAPI into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every ward's forecast and persist it (default).
    Sync(SyncArgs),
    /// Apply database migrations.
    Migrate,
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    /// Wards per window; also the in-flight request limit.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Pause between windows in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Cap on wards processed, 0 for all.
    #[arg(long)]
    max_wards: Option<usize>,
    /// Process only 5 wards.
    #[arg(long)]
    test_mode: bool,
    /// Fetch and normalize without writing to the database.
    #[arg(long)]
    dry_run: bool,
    /// Also write the run summary JSON to this file.
    #[arg(long)]
    summary_path: Option<PathBuf>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

async fn sync(args: SyncArgs) -> Result<()> {
    let mut config = RunConfig::from_env()?;
    if let Some(batch_size) = args.batch_size {
        config.options.batch_size = batch_size;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.options.delay_ms = delay_ms;
    }
    if let Some(max_wards) = args.max_wards {
        config.options.max_wards = max_wards;
    }
    if args.test_mode {
        config.options.test_mode = true;
        info!("test mode: processing only 5 wards");
    }
    config.options.validate()?;

    let report = run_sync(&config, args.dry_run).await?;
    let summary = serde_json::to_string_pretty(&report.summary).context("serializing run summary")?;
    println!("{summary}");

    if let Some(path) = args.summary_path {
        tokio::fs::write(&path, &summary)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "summary written");
    }
    Ok(())
}

async fn migrate() -> Result<()> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL environment variable is not set")?;
    PgStore::connect(&database_url).await?.migrate().await?;
    info!("migrations applied");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => sync(args).await,
        Commands::Migrate => migrate().await,
    }
}
