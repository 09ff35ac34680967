//! Source connectors: where candidates come from and how their detail is read.

use async_trait::async_trait;
use clap::ValueEnum;

use crate::fetcher::FetchError;
use crate::model::{Candidate, EnrichmentMode};

pub mod bulletin;
pub mod timeline;

pub use bulletin::BulletinSource;
pub use timeline::TimelineSource;

/// Yields the current candidate list for one origin.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Origin handle stored on every item and used to window the known set.
    fn origin(&self) -> &str;

    fn mode(&self) -> EnrichmentMode;

    async fn collect(&self) -> Result<Vec<Candidate>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Public profile timeline, enriched from snapshots.
    Timeline,
    /// Ministry policy bulletins, enriched from article text.
    Bulletin,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Timeline => "timeline",
            SourceKind::Bulletin => "bulletin",
        }
    }
}

/// Browser-like UA for sites that refuse obvious bots.
pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36";

pub(crate) fn selector(css: &str) -> scraper::Selector {
    scraper::Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}
