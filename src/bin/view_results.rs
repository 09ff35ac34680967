use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use signal_relay::config;
use signal_relay::db;
use signal_relay::enrich::summarizer::response_text;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print stored enrichment results, newest first")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Rows to list
    #[arg(long, default_value_t = 10)]
    limit: u32,
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
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let total = db::count_enrichments(&pool).await?;
    println!("enrichments: {total}");
    let rows = db::list_enrichments(&pool, args.limit).await?;
    for row in &rows {
        println!(
            "#{} {} {} | {} | {}",
            row.id,
            row.processed_at.format("%Y-%m-%d %H:%M:%S"),
            row.identity,
            row.summary_text,
            row.remote_media_url.as_deref().unwrap_or("-")
        );
    }

    if let Some(newest) = rows.first() {
        // raw responses are the service's JSON; older rows may hold plain text
        let text = response_text(&newest.ai_raw_response)
            .unwrap_or_else(|_| newest.ai_summary_text.clone());
        println!("\nlatest ({}):\n{text}", newest.identity);
    }
    Ok(())
}
