//! Row models returned by repositories.

use chrono::{DateTime, Utc};

/// An `items` row as stored, including bookkeeping columns.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub identity: String,
    pub origin_handle: String,
    pub body_text: String,
    pub is_repost: bool,
    pub reference_url: String,
    pub snapshot_path: Option<String>,
    pub title: Option<String>,
    pub published_on: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub raw_payload: String,
}

/// An `enrichments` row, used by the inspection tooling.
#[derive(Debug, Clone)]
pub struct EnrichmentRow {
    pub id: i64,
    pub identity: String,
    pub snapshot_path: Option<String>,
    pub remote_media_url: Option<String>,
    pub ai_summary_text: String,
    pub ai_raw_response: String,
    pub summary_text: String,
    pub processed_at: DateTime<Utc>,
}
