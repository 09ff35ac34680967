use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use signal_relay::config::{self, Config};

#[derive(Debug, Parser)]
#[command(author, version, about = "Show the resolved configuration with credentials masked")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print an example configuration and exit
    #[arg(long)]
    example: bool,
}

/// Keeps the first few characters of an identifier.
fn mask_head(value: &str) -> String {
    if value.is_empty() {
        return "(not set)".to_string();
    }
    let head: String = value.chars().take(6).collect();
    format!("{head}...**********")
}

/// Keeps only the last four characters of a secret.
fn mask_tail(value: &str) -> String {
    if value.is_empty() {
        return "(not set)".to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("********************...{tail}")
}

fn print(cfg: &Config) {
    println!("[app]");
    println!("  database: {}", cfg.database_url());
    println!("  known window: {}", cfg.app.known_window);
    println!("  backups: {} (keep {})", cfg.app.backup_dir, cfg.app.backup_keep);

    println!("[timeline]");
    println!("  handle: @{}", cfg.timeline.handle);
    println!("  cookie file: {}", cfg.timeline.cookie_file);
    println!("  snapshots: {}", cfg.timeline.snapshot_dir);
    println!(
        "  max detail pages: {}, delay {}-{} ms, timeout {} ms",
        cfg.timeline.max_detail_pages,
        cfg.timeline.delay.min_ms,
        cfg.timeline.delay.max_ms,
        cfg.timeline.timeout_ms
    );

    println!("[bulletin]");
    println!("  list url: {}", cfg.bulletin.list_url);
    println!(
        "  today only: {}, max detail pages: {}, delay {}-{} ms",
        cfg.bulletin.today_only,
        cfg.bulletin.max_detail_pages,
        cfg.bulletin.delay.min_ms,
        cfg.bulletin.delay.max_ms
    );

    println!("[render]");
    println!("  base url: {}", cfg.render.base_url);
    println!("  token: {}", mask_tail(cfg.render.token.as_deref().unwrap_or_default()));

    println!("[object_store]");
    println!("  access key id: {}", mask_head(&cfg.object_store.access_key_id));
    println!("  access key secret: {}", mask_tail(&cfg.object_store.access_key_secret));
    println!("  bucket: {}", cfg.object_store.bucket);
    println!("  endpoint: {}", cfg.object_store.resolved_endpoint());

    println!("[ai]");
    println!("  api key: {}", mask_head(&cfg.ai.api_key));
    println!("  base url: {}", cfg.ai.base_url);
    println!("  models: {} / {}", cfg.ai.vision_model, cfg.ai.text_model);
    println!(
        "  retry: {} attempts, {} ms {:?}",
        cfg.ai.retry.max_attempts, cfg.ai.retry.delay_ms, cfg.ai.retry.backoff
    );

    println!("[notify]");
    println!("  timeline webhook: {}", mask_head(&cfg.notify.timeline_webhook));
    println!("  bulletin webhook: {}", mask_head(&cfg.notify.bulletin_webhook));

    for (name, check) in [
        ("timeline", cfg.require_timeline()),
        ("bulletin", cfg.require_bulletin()),
    ] {
        match check {
            Ok(()) => println!("{name}: ready"),
            Err(err) => println!("{name}: not ready ({err})"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.example {
        print!("{}", config::example());
        return Ok(());
    }
    let cfg = config::load(Some(&args.config))?;
    print(&cfg);
    Ok(())
}
