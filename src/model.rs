use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a source's items are handed to the summarizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnrichmentMode {
    /// Upload the rendered snapshot and summarize the image URL.
    Snapshot,
    /// Summarize the extracted body text directly.
    Text,
}

impl EnrichmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentMode::Snapshot => "snapshot",
            EnrichmentMode::Text => "text",
        }
    }
}

/// An entry seen on a listing or timeline before its detail page is visited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub identity: String,
    pub origin_handle: String,
    pub reference_url: String,
    pub is_repost: bool,
    pub title: Option<String>,
    pub published_on: Option<String>,
}

impl Candidate {
    pub fn new(
        identity: impl Into<String>,
        origin_handle: impl Into<String>,
        reference_url: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            origin_handle: origin_handle.into(),
            reference_url: reference_url.into(),
            is_repost: false,
            title: None,
            published_on: None,
        }
    }
}

/// Result of a successful detail request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detail {
    pub body_text: String,
    pub snapshot_path: Option<String>,
}

/// One unit of source content, ready to be written to the local store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub identity: String,
    pub origin_handle: String,
    pub body_text: String,
    pub is_repost: bool,
    pub reference_url: String,
    pub snapshot_path: Option<String>,
    pub title: Option<String>,
    pub published_on: Option<String>,
}

impl Item {
    /// An item whose detail fetch failed: identity is known, content is not.
    pub fn without_detail(candidate: Candidate) -> Self {
        Self::with_detail(candidate, Detail::default())
    }

    pub fn with_detail(candidate: Candidate, detail: Detail) -> Self {
        Self {
            identity: candidate.identity,
            origin_handle: candidate.origin_handle,
            body_text: detail.body_text,
            is_repost: candidate.is_repost,
            reference_url: candidate.reference_url,
            snapshot_path: detail.snapshot_path,
            title: candidate.title,
            published_on: candidate.published_on,
        }
    }

    /// Whether the enrichment fan-out has anything to work with for `mode`.
    pub fn has_media(&self, mode: EnrichmentMode) -> bool {
        match mode {
            EnrichmentMode::Snapshot => self
                .snapshot_path
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty()),
            EnrichmentMode::Text => !self.body_text.trim().is_empty(),
        }
    }
}

/// Summarizer output persisted per identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichmentRecord {
    pub identity: String,
    pub snapshot_path: Option<String>,
    pub remote_media_url: Option<String>,
    pub ai_summary_text: String,
    pub ai_raw_response: String,
    pub summary_text: String,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_media_depends_on_mode() {
        let mut item = Item::without_detail(Candidate::new("1", "someone", "https://x.com/someone/status/1"));
        assert!(!item.has_media(EnrichmentMode::Snapshot));
        assert!(!item.has_media(EnrichmentMode::Text));

        item.body_text = "hello".into();
        assert!(item.has_media(EnrichmentMode::Text));
        assert!(!item.has_media(EnrichmentMode::Snapshot));

        item.snapshot_path = Some("screenshots/1.jpg".into());
        assert!(item.has_media(EnrichmentMode::Snapshot));
    }
}
