use super::model::{EnrichmentRow, StoredItem};
use crate::model::{EnrichmentRecord, Item};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create the parent
/// directory. In-memory and non-sqlite URLs pass through untouched.
pub fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // sqlx creates the file only when asked to
    let mut rebuilt = format!("sqlite://{expanded}");
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// The most recent `limit` identities observed for `origin`.
///
/// This is a bounded cache for the dedupe filter, not a full index: items
/// older than the window are treated as unseen and get re-fetched.
#[instrument(skip_all, fields(origin = %origin, limit))]
pub async fn known_identities(pool: &Pool, origin: &str, limit: u32) -> Result<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT identity FROM items WHERE origin_handle = ? ORDER BY observed_at DESC LIMIT ?",
    )
    .bind(origin)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

/// Insert or overwrite one item keyed by identity.
#[instrument(skip_all, fields(identity = %item.identity))]
pub async fn upsert_item(pool: &Pool, item: &Item, observed_at: DateTime<Utc>) -> Result<()> {
    let raw_payload = serde_json::to_string(item).context("failed to serialize item")?;
    sqlx::query(
        "INSERT INTO items (identity, origin_handle, body_text, is_repost, reference_url, \
                            snapshot_path, title, published_on, observed_at, raw_payload) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(identity) DO UPDATE SET \
            body_text = excluded.body_text, \
            is_repost = excluded.is_repost, \
            snapshot_path = excluded.snapshot_path, \
            title = excluded.title, \
            published_on = excluded.published_on, \
            observed_at = excluded.observed_at, \
            raw_payload = excluded.raw_payload",
    )
    .bind(&item.identity)
    .bind(&item.origin_handle)
    .bind(&item.body_text)
    .bind(item.is_repost)
    .bind(&item.reference_url)
    .bind(&item.snapshot_path)
    .bind(&item.title)
    .bind(&item.published_on)
    .bind(observed_at)
    .bind(raw_payload)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert item {}", item.identity))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_item(pool: &Pool, identity: &str) -> Result<Option<StoredItem>> {
    let row = sqlx::query(
        "SELECT identity, origin_handle, body_text, is_repost, reference_url, snapshot_path, \
                title, published_on, observed_at, raw_payload \
         FROM items WHERE identity = ?",
    )
    .bind(identity)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| StoredItem {
        identity: row.get("identity"),
        origin_handle: row.get("origin_handle"),
        body_text: row.get("body_text"),
        is_repost: row.get("is_repost"),
        reference_url: row.get("reference_url"),
        snapshot_path: row.get("snapshot_path"),
        title: row.get("title"),
        published_on: row.get("published_on"),
        observed_at: row.get("observed_at"),
        raw_payload: row.get("raw_payload"),
    }))
}

/// Stored items of `origin` without an enrichment row, oldest first.
///
/// Covers items whose enrichment failed or was reset after they entered the
/// known set, so they are never fetched again.
#[instrument(skip_all, fields(origin = %origin, limit))]
pub async fn unenriched_items(pool: &Pool, origin: &str, limit: u32) -> Result<Vec<Item>> {
    let rows = sqlx::query(
        "SELECT i.identity, i.origin_handle, i.body_text, i.is_repost, i.reference_url, \
                i.snapshot_path, i.title, i.published_on \
         FROM items i LEFT JOIN enrichments e ON e.identity = i.identity \
         WHERE i.origin_handle = ? AND e.identity IS NULL \
         ORDER BY i.observed_at ASC LIMIT ?",
    )
    .bind(origin)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| Item {
            identity: row.get("identity"),
            origin_handle: row.get("origin_handle"),
            body_text: row.get("body_text"),
            is_repost: row.get("is_repost"),
            reference_url: row.get("reference_url"),
            snapshot_path: row.get("snapshot_path"),
            title: row.get("title"),
            published_on: row.get("published_on"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn count_items(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Every identity that already has an enrichment row.
#[instrument(skip_all)]
pub async fn processed_identities(pool: &Pool) -> Result<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT identity FROM enrichments")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().collect())
}

#[instrument(skip_all, fields(identity = %record.identity))]
pub async fn upsert_enrichment(pool: &Pool, record: &EnrichmentRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO enrichments (identity, snapshot_path, remote_media_url, ai_summary_text, \
                                  ai_raw_response, summary_text, processed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(identity) DO UPDATE SET \
            snapshot_path = excluded.snapshot_path, \
            remote_media_url = excluded.remote_media_url, \
            ai_summary_text = excluded.ai_summary_text, \
            ai_raw_response = excluded.ai_raw_response, \
            summary_text = excluded.summary_text, \
            processed_at = excluded.processed_at",
    )
    .bind(&record.identity)
    .bind(&record.snapshot_path)
    .bind(&record.remote_media_url)
    .bind(&record.ai_summary_text)
    .bind(&record.ai_raw_response)
    .bind(&record.summary_text)
    .bind(record.processed_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert enrichment {}", record.identity))?;
    Ok(())
}

/// Returns the number of rows removed (0 or 1).
#[instrument(skip_all)]
pub async fn delete_enrichment(pool: &Pool, identity: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM enrichments WHERE identity = ?")
        .bind(identity)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn wipe_enrichments(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM enrichments").execute(pool).await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_enrichments(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrichments")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Enrichment rows, newest first.
#[instrument(skip_all)]
pub async fn list_enrichments(pool: &Pool, limit: u32) -> Result<Vec<EnrichmentRow>> {
    let rows = sqlx::query(
        "SELECT id, identity, snapshot_path, remote_media_url, ai_summary_text, \
                ai_raw_response, summary_text, processed_at \
         FROM enrichments ORDER BY processed_at DESC, id DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(enrichment_from_row).collect())
}

fn enrichment_from_row(row: &SqliteRow) -> EnrichmentRow {
    EnrichmentRow {
        id: row.get("id"),
        identity: row.get("identity"),
        snapshot_path: row.get("snapshot_path"),
        remote_media_url: row.get("remote_media_url"),
        ai_summary_text: row.get("ai_summary_text"),
        ai_raw_response: row.get("ai_raw_response"),
        summary_text: row.get("summary_text"),
        processed_at: row.get("processed_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candidate;
    use chrono::Duration;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn item(id: &str, origin: &str) -> Item {
        Item::without_detail(Candidate::new(
            id,
            origin,
            format!("https://x.com/{origin}/status/{id}"),
        ))
    }

    #[test]
    fn prepare_url_variants() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x/y"), "postgres://x/y");

        let td = tempfile::tempdir().unwrap();
        let db = td.path().join("nested/dir/app.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", db.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", db.display()));
        assert!(td.path().join("nested/dir").exists());

        let url = prepare_sqlite_url(&format!("sqlite://{}?mode=ro", db.display()));
        assert!(url.ends_with("?mode=ro"));
    }

    #[tokio::test]
    async fn upsert_item_overwrites_in_place() {
        let pool = setup_pool().await;
        let t0 = Utc::now();

        let mut first = item("42", "someone");
        upsert_item(&pool, &first, t0).await.unwrap();

        first.body_text = "edited".into();
        first.is_repost = true;
        first.snapshot_path = Some("screenshots/42.jpg".into());
        upsert_item(&pool, &first, t0 + Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(count_items(&pool).await.unwrap(), 1);
        let stored = fetch_item(&pool, "42").await.unwrap().unwrap();
        assert_eq!(stored.body_text, "edited");
        assert!(stored.is_repost);
        assert_eq!(stored.snapshot_path.as_deref(), Some("screenshots/42.jpg"));
        assert_eq!(
            stored.observed_at.timestamp(),
            (t0 + Duration::seconds(5)).timestamp()
        );
        assert!(stored.raw_payload.contains("\"edited\""));
    }

    #[tokio::test]
    async fn known_identities_is_windowed_per_origin() {
        let pool = setup_pool().await;
        let t0 = Utc::now();
        for i in 0..5 {
            upsert_item(&pool, &item(&i.to_string(), "a"), t0 + Duration::seconds(i))
                .await
                .unwrap();
        }
        upsert_item(&pool, &item("other", "b"), t0).await.unwrap();

        let known = known_identities(&pool, "a", 3).await.unwrap();
        assert_eq!(
            known,
            ["2", "3", "4"].iter().map(|s| s.to_string()).collect()
        );
        assert!(known_identities(&pool, "c", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unenriched_items_skips_enriched_and_other_origins() {
        let pool = setup_pool().await;
        let t0 = Utc::now();
        upsert_item(&pool, &item("2", "a"), t0 + Duration::seconds(2)).await.unwrap();
        upsert_item(&pool, &item("1", "a"), t0).await.unwrap();
        upsert_item(&pool, &item("3", "a"), t0 + Duration::seconds(3)).await.unwrap();
        upsert_item(&pool, &item("x", "b"), t0).await.unwrap();
        upsert_enrichment(
            &pool,
            &EnrichmentRecord {
                identity: "2".into(),
                snapshot_path: None,
                remote_media_url: None,
                ai_summary_text: "done".into(),
                ai_raw_response: "{}".into(),
                summary_text: "done".into(),
                processed_at: t0,
            },
        )
        .await
        .unwrap();

        let pending = unenriched_items(&pool, "a", 10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(pending[0], item("1", "a"));
        assert_eq!(unenriched_items(&pool, "a", 1).await.unwrap().len(), 1);

        delete_enrichment(&pool, "2").await.unwrap();
        assert_eq!(unenriched_items(&pool, "a", 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn enrichment_rows_are_unique_and_resettable() {
        let pool = setup_pool().await;
        let mut rec = EnrichmentRecord {
            identity: "42".into(),
            snapshot_path: Some("screenshots/42.jpg".into()),
            remote_media_url: Some("https://b.example/42.jpg".into()),
            ai_summary_text: "first".into(),
            ai_raw_response: "{}".into(),
            summary_text: "first".into(),
            processed_at: Utc::now(),
        };
        upsert_enrichment(&pool, &rec).await.unwrap();
        rec.ai_summary_text = "second".into();
        upsert_enrichment(&pool, &rec).await.unwrap();

        assert_eq!(count_enrichments(&pool).await.unwrap(), 1);
        let rows = list_enrichments(&pool, 10).await.unwrap();
        assert_eq!(rows[0].ai_summary_text, "second");
        assert!(processed_identities(&pool).await.unwrap().contains("42"));

        assert_eq!(delete_enrichment(&pool, "missing").await.unwrap(), 0);
        assert_eq!(delete_enrichment(&pool, "42").await.unwrap(), 1);

        rec.identity = "43".into();
        upsert_enrichment(&pool, &rec).await.unwrap();
        rec.identity = "44".into();
        upsert_enrichment(&pool, &rec).await.unwrap();
        assert_eq!(wipe_enrichments(&pool).await.unwrap(), 2);
        assert_eq!(count_enrichments(&pool).await.unwrap(), 0);
    }
}
