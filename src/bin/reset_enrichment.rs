use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use signal_relay::config;
use signal_relay::db;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Forget enrichment results so the next run processes them again"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Identity whose enrichment should be removed
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    identity: Option<String>,

    /// Remove every enrichment row
    #[arg(long)]
    all: bool,

    /// Confirm --all
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.all && !args.yes {
        bail!("--all removes every enrichment; pass --yes to confirm");
    }

    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    if args.all {
        let removed = db::wipe_enrichments(&pool).await?;
        info!(removed, "all enrichments removed");
        return Ok(());
    }

    let identity = args.identity.unwrap_or_default();
    match db::delete_enrichment(&pool, &identity).await? {
        0 => warn!(%identity, "no enrichment found"),
        _ => info!(%identity, "enrichment removed; it will be processed again"),
    }
    Ok(())
}
