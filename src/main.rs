use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use signal_relay::config::{self, Config};
use signal_relay::db::{self, Pool};
use signal_relay::enrich::prompt::{BULLETIN_INSTRUCTIONS, SNAPSHOT_INSTRUCTIONS};
use signal_relay::enrich::{Enricher, ObjectStore, OpenAiSummarizer, S3ObjectStore, WebhookNotifier};
use signal_relay::pipeline::{self, PipelineError, RunReport, RunSettings};
use signal_relay::render::{load_cookies, RenderClient};
use signal_relay::sources::{BulletinSource, SourceConnector, SourceKind, TimelineSource};

#[derive(Debug, Parser)]
#[command(author, version, about = "Scrape one source, store what is new and relay AI summaries")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Which source to run
    #[arg(long, value_enum, default_value = "timeline")]
    source: SourceKind,
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    info!(source = args.source.as_str(), "starting run");
    let run = async {
        match args.source {
            SourceKind::Timeline => run_timeline(&cfg, &pool).await,
            SourceKind::Bulletin => run_bulletin(&cfg, &pool).await,
        }
    };

    match pipeline::until_interrupted(run, tokio::signal::ctrl_c()).await {
        Ok(report) => {
            info!(?report, "done");
            Ok(())
        }
        Err(err) => {
            error!(?err, "run aborted");
            Err(err)
        }
    }
}

async fn run_timeline(cfg: &Config, pool: &Pool) -> Result<RunReport> {
    cfg.require_timeline()
        .map_err(|e| PipelineError::Precondition(e.to_string()))?;
    let t = &cfg.timeline;

    let cookies = load_cookies(Path::new(&t.cookie_file))
        .map_err(|e| PipelineError::Precondition(e.to_string()))?;
    let render = RenderClient::new(
        &cfg.render.base_url,
        cfg.render.token.as_deref(),
        cookies,
        Duration::from_millis(t.timeout_ms),
    )?;
    let source = TimelineSource::new(t.handle.clone(), render);

    let store = S3ObjectStore::from_config(&cfg.object_store)?;
    let summarizer = OpenAiSummarizer::from_config(&cfg.ai)?;
    let notifier = WebhookNotifier::new(&cfg.notify.timeline_webhook)?;
    let mut enricher = Enricher::load(
        pool,
        source.mode(),
        Some(&store as &dyn ObjectStore),
        &summarizer,
        &notifier,
        cfg.retry_policy(),
        SNAPSHOT_INSTRUCTIONS,
        cfg.database_url(),
    )
    .await?;

    let settings = RunSettings {
        known_window: cfg.app.known_window,
        max_items: t.max_detail_pages,
        pacing: t.delay.into(),
        snapshot_dir: cfg.snapshot_dir(),
    };
    let report = pipeline::run_source(pool, &source, &source, &mut enricher, &settings).await?;
    Ok(report)
}

async fn run_bulletin(cfg: &Config, pool: &Pool) -> Result<RunReport> {
    cfg.require_bulletin()
        .map_err(|e| PipelineError::Precondition(e.to_string()))?;
    let b = &cfg.bulletin;

    let today = b.today_only.then(|| Local::now().date_naive());
    let source = BulletinSource::new(
        &b.list_url,
        b.feed_name.clone(),
        b.page_size,
        today,
        Duration::from_millis(b.timeout_ms),
    )
    .with_context(|| format!("invalid bulletin.list_url {}", b.list_url))?;

    let summarizer = OpenAiSummarizer::from_config(&cfg.ai)?;
    let notifier = WebhookNotifier::new(&cfg.notify.bulletin_webhook)?;
    let mut enricher = Enricher::load(
        pool,
        source.mode(),
        None,
        &summarizer,
        &notifier,
        cfg.retry_policy(),
        BULLETIN_INSTRUCTIONS,
        cfg.database_url(),
    )
    .await?;

    let settings = RunSettings {
        known_window: cfg.app.known_window,
        max_items: b.max_detail_pages,
        pacing: b.delay.into(),
        snapshot_dir: cfg.snapshot_dir(),
    };
    let report = pipeline::run_source(pool, &source, &source, &mut enricher, &settings).await?;
    Ok(report)
}
