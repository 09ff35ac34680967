//! One run for one source: collect → dedupe → fetch → persist → enrich.

use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::db::{self, Pool};
use crate::dedupe::filter_unseen;
use crate::enrich::{EnrichStats, Enricher};
use crate::fetcher::{fetch_details, DetailFetcher, FetchError, Pacing};
use crate::model::Item;
use crate::sources::SourceConnector;

/// Errors that end a run. Everything else is logged and counted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("session rejected: {0}")]
    Session(String),
    #[error("local store: {0}")]
    Store(#[from] anyhow::Error),
    #[error("run interrupted")]
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// How many recent identities per origin count as known.
    pub known_window: u32,
    /// Detail pages fetched per run.
    pub max_items: usize,
    pub pacing: Pacing,
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub collected: usize,
    pub unseen: usize,
    pub fetched: usize,
    pub written: usize,
    /// Stored items retried because they had no enrichment yet.
    pub backlog: usize,
    pub enrich: EnrichStats,
}

/// Upsert every item; a failed row is logged and the rest are still tried.
/// Returns the items that made it to the store.
pub async fn write_items(pool: &Pool, items: Vec<Item>) -> Vec<Item> {
    let observed_at = Utc::now();
    let mut written = Vec::with_capacity(items.len());
    for item in items {
        match db::upsert_item(pool, &item, observed_at).await {
            Ok(()) => written.push(item),
            Err(err) => warn!(identity = %item.identity, ?err, "item write failed"),
        }
    }
    written
}

pub async fn run_source(
    pool: &Pool,
    connector: &dyn SourceConnector,
    fetcher: &dyn DetailFetcher,
    enricher: &mut Enricher<'_>,
    settings: &RunSettings,
) -> Result<RunReport, PipelineError> {
    let span = info_span!(
        "run",
        run_id = %Uuid::new_v4(),
        origin = %connector.origin(),
        mode = connector.mode().as_str()
    );
    run_inner(pool, connector, fetcher, enricher, settings)
        .instrument(span)
        .await
}

async fn run_inner(
    pool: &Pool,
    connector: &dyn SourceConnector,
    fetcher: &dyn DetailFetcher,
    enricher: &mut Enricher<'_>,
    settings: &RunSettings,
) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::default();

    let known = db::known_identities(pool, connector.origin(), settings.known_window).await?;
    let candidates = connector.collect().await.map_err(fatal)?;
    report.collected = candidates.len();

    let unseen = filter_unseen(&known, candidates);
    report.unseen = unseen.len();
    info!(
        known = known.len(),
        collected = report.collected,
        unseen = report.unseen,
        "candidates deduped"
    );

    let mut written = Vec::new();
    if unseen.is_empty() {
        info!("nothing new");
    } else {
        let items = fetch_details(
            fetcher,
            unseen,
            settings.max_items,
            &settings.pacing,
            &settings.snapshot_dir,
        )
        .await
        .map_err(fatal)?;
        report.fetched = items.len();

        written = write_items(pool, items).await;
        report.written = written.len();
        if report.written < report.fetched {
            warn!(
                failed = report.fetched - report.written,
                "some items were not persisted"
            );
        }
    }

    // stored items left without a result by an earlier failure or a reset
    let fresh: HashSet<String> = written.iter().map(|i| i.identity.clone()).collect();
    let backlog: Vec<Item> =
        db::unenriched_items(pool, connector.origin(), settings.known_window)
            .await?
            .into_iter()
            .filter(|i| !fresh.contains(&i.identity) && i.has_media(connector.mode()))
            .collect();
    report.backlog = backlog.len();
    if !backlog.is_empty() {
        info!(backlog = report.backlog, "retrying stored items without enrichment");
    }
    written.extend(backlog);

    report.enrich = enricher.enrich_all(&written).await;
    info!(
        fetched = report.fetched,
        written = report.written,
        backlog = report.backlog,
        enriched = report.enrich.enriched,
        already_processed = report.enrich.already_processed,
        without_media = report.enrich.without_media,
        enrich_failed = report.enrich.failed,
        notify_failed = report.enrich.notify_failed,
        "run finished"
    );
    Ok(report)
}

/// Resolve `run` unless `interrupt` completes first, which ends the run
/// with [`PipelineError::Interrupted`]. Work already stored stays stored.
pub async fn until_interrupted<T, E, R, I>(run: R, interrupt: I) -> Result<T, E>
where
    R: Future<Output = Result<T, E>>,
    I: Future,
    E: From<PipelineError>,
{
    tokio::select! {
        res = run => res,
        _ = interrupt => {
            warn!("interrupted; stored items are kept");
            Err(PipelineError::Interrupted.into())
        }
    }
}

fn fatal(err: FetchError) -> PipelineError {
    match err {
        FetchError::Session(msg) => PipelineError::Session(msg),
        FetchError::Transient(msg) => PipelineError::Precondition(format!("candidate listing failed: {msg}")),
    }
}
