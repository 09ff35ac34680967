use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use signal_relay::backup;
use signal_relay::config;
use signal_relay::db;

#[derive(Debug, Parser)]
#[command(author, version, about = "Copy the database to a dated backup and rotate old copies")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Backups to keep per database (defaults to app.backup_keep)
    #[arg(long)]
    keep: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = cfg.database_url();
    let db_file = backup::sqlite_file(&database_url)
        .ok_or_else(|| anyhow!("{database_url} is not a file-backed sqlite database"))?;
    if !db_file.exists() {
        return Err(anyhow!("database file {} does not exist", db_file.display()));
    }

    let backup_dir = Path::new(&cfg.app.backup_dir);
    let name = backup::backup_name(&db_file, Local::now().date_naive())?;
    let pool = db::init_pool(&database_url).await?;
    let size = backup::copy_database(&pool, &backup_dir.join(&name)).await?;
    pool.close().await;

    let stem = db_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let keep = args.keep.unwrap_or(cfg.app.backup_keep);
    let removed = backup::prune_backups(backup_dir, stem, keep)?;
    info!(
        backup = %name,
        size_kb = size / 1024,
        keep,
        removed = removed.len(),
        "backup complete"
    );
    Ok(())
}
