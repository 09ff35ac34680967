//! Enrichment fan-out: upload → summarize → persist → notify, once per
//! identity.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{EnrichmentMode, EnrichmentRecord, Item};
use crate::retry::RetryPolicy;

pub mod format;
pub mod model;
pub mod notifier;
pub mod object_store;
pub mod prompt;
pub mod summarizer;

pub use notifier::WebhookNotifier;
pub use object_store::S3ObjectStore;
pub use summarizer::OpenAiSummarizer;

/// What the summarizer is asked to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryInput<'a> {
    ImageUrl(&'a str),
    Text(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Assistant message text.
    pub text: String,
    /// Full response body, kept for audit.
    pub raw: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file and return its public URL. An object that already
    /// exists is a success.
    async fn put_file(&self, path: &Path) -> Result<String>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, instructions: &str, input: SummaryInput<'_>) -> Result<Summary>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

enum Prepared {
    Image(String),
    Text(String),
}

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub enriched: usize,
    pub already_processed: usize,
    pub without_media: usize,
    pub failed: usize,
    pub notify_failed: usize,
}

/// Collaborators and settings for one source's fan-out.
pub struct Enricher<'a> {
    pool: &'a Pool,
    mode: EnrichmentMode,
    store: Option<&'a dyn ObjectStore>,
    summarizer: &'a dyn Summarizer,
    notifier: &'a dyn Notifier,
    retry: RetryPolicy,
    instructions: &'a str,
    /// Shown in text-mode notifications as where the item lives locally.
    store_location: String,
    processed: HashSet<String>,
}

impl<'a> Enricher<'a> {
    /// Loads the processed-identity set once; later checks are in memory.
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        pool: &'a Pool,
        mode: EnrichmentMode,
        store: Option<&'a dyn ObjectStore>,
        summarizer: &'a dyn Summarizer,
        notifier: &'a dyn Notifier,
        retry: RetryPolicy,
        instructions: &'a str,
        store_location: impl Into<String>,
    ) -> Result<Self> {
        let processed = db::processed_identities(pool).await?;
        info!(processed = processed.len(), mode = mode.as_str(), "enrichment state loaded");
        Ok(Self {
            pool,
            mode,
            store,
            summarizer,
            notifier,
            retry,
            instructions,
            store_location: store_location.into(),
            processed,
        })
    }

    pub fn is_processed(&self, identity: &str) -> bool {
        self.processed.contains(identity)
    }

    pub async fn enrich_all(&mut self, items: &[Item]) -> EnrichStats {
        let mut stats = EnrichStats::default();
        for item in items {
            if !item.has_media(self.mode) {
                stats.without_media += 1;
                continue;
            }
            if self.is_processed(&item.identity) {
                stats.already_processed += 1;
                continue;
            }
            match self.enrich_one(item).await {
                Ok(notified) => {
                    stats.enriched += 1;
                    if !notified {
                        stats.notify_failed += 1;
                    }
                }
                Err(err) => {
                    warn!(identity = %item.identity, ?err, "enrichment skipped");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// Returns whether the notification went out. Errors before the record
    /// is persisted leave the identity unprocessed for the next run.
    #[instrument(skip_all, fields(identity = %item.identity))]
    async fn enrich_one(&mut self, item: &Item) -> Result<bool> {
        let summarizer = self.summarizer;
        let instructions = self.instructions;
        let prepared = match self.mode {
            EnrichmentMode::Snapshot => {
                let store = self
                    .store
                    .ok_or_else(|| anyhow!("snapshot mode needs an object store"))?;
                let path = item
                    .snapshot_path
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .map(Path::new)
                    .ok_or_else(|| anyhow!("item {} has no snapshot to upload", item.identity))?;
                let url = self.retry.run("upload", || store.put_file(path)).await?;
                Prepared::Image(url)
            }
            EnrichmentMode::Text => Prepared::Text(prompt::text_payload(item)),
        };
        let input = match &prepared {
            Prepared::Image(url) => SummaryInput::ImageUrl(url),
            Prepared::Text(text) => SummaryInput::Text(text),
        };
        let summary = self
            .retry
            .run("summarize", || summarizer.summarize(instructions, input))
            .await?;
        let remote_media_url = match prepared {
            Prepared::Image(url) => Some(url),
            Prepared::Text(_) => None,
        };

        let summary_text = format::extract_summary(&summary.text);
        let record = EnrichmentRecord {
            identity: item.identity.clone(),
            snapshot_path: item.snapshot_path.clone(),
            remote_media_url: remote_media_url.clone(),
            ai_summary_text: summary.text.clone(),
            ai_raw_response: summary.raw,
            summary_text: summary_text.clone(),
            processed_at: Utc::now(),
        };
        db::upsert_enrichment(self.pool, &record).await?;
        self.processed.insert(item.identity.clone());
        info!(summary = %summary_text, "enrichment stored");

        let message = match self.mode {
            EnrichmentMode::Snapshot => {
                format::format_signal(&summary.text, remote_media_url.as_deref().unwrap_or_default())
            }
            EnrichmentMode::Text => {
                format::format_bulletin(item, &self.store_location, &summary.text)
            }
        };
        match self.notifier.notify(&message).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(?err, "notification failed");
                Ok(false)
            }
        }
    }
}
