//! Dated database copies with rotation.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::db::Pool;

/// `<stem>_<YYYYMMDD>.<ext>` for the database at `db_path`.
pub fn backup_name(db_path: &Path, date: NaiveDate) -> Result<String> {
    let stem = db_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("database path has no file name: {}", db_path.display()))?;
    let stamp = date.format("%Y%m%d");
    Ok(match db_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{stamp}.{ext}"),
        None => format!("{stem}_{stamp}"),
    })
}

/// Filesystem path of a `sqlite:` URL, or None for in-memory databases.
pub fn sqlite_file(database_url: &str) -> Option<PathBuf> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Write a consistent copy of the live database to `dest`.
///
/// `VACUUM INTO` reads through the WAL, so the copy includes committed
/// transactions that have not been checkpointed yet. An existing `dest` is
/// replaced.
pub async fn copy_database(pool: &Pool, dest: &Path) -> Result<u64> {
    if dest.exists() {
        fs::remove_file(dest).with_context(|| format!("failed to replace {}", dest.display()))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    sqlx::query("VACUUM INTO ?")
        .bind(dest.to_string_lossy().into_owned())
        .execute(pool)
        .await
        .with_context(|| format!("failed to back up into {}", dest.display()))?;
    let size = fs::metadata(dest)?.len();
    info!(dest = %dest.display(), size, "backup written");
    Ok(size)
}

/// Delete all but the newest `keep` backups of `stem` in `dir`, by mtime.
/// Returns the removed paths.
pub fn prune_backups(dir: &Path, stem: &str, keep: usize) -> Result<Vec<PathBuf>> {
    let prefix = format!("{stem}_");
    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_backup_of(name, &prefix) || !entry.file_type()?.is_file() {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        backups.push((mtime, entry.path()));
    }
    backups.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = Vec::new();
    for (_, path) in backups.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "old backup removed");
                removed.push(path);
            }
            Err(err) => warn!(path = %path.display(), ?err, "failed to remove old backup"),
        }
    }
    Ok(removed)
}

/// `<stem>_<8 digits>` followed by nothing or an extension.
fn is_backup_of(name: &str, prefix: &str) -> bool {
    let Some(rest) = name.strip_prefix(prefix) else {
        return false;
    };
    let (Some(date), Some(tail)) = (rest.get(..8), rest.get(8..)) else {
        return false;
    };
    date.bytes().all(|b| b.is_ascii_digit()) && (tail.is_empty() || tail.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn names_and_urls() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(
            backup_name(Path::new("data/signal-relay.db"), d).unwrap(),
            "signal-relay_20250304.db"
        );
        assert_eq!(backup_name(Path::new("plain"), d).unwrap(), "plain_20250304");

        assert_eq!(
            sqlite_file("sqlite://data/signal-relay.db?mode=rwc"),
            Some(PathBuf::from("data/signal-relay.db"))
        );
        assert_eq!(sqlite_file("sqlite::memory:"), None);
        assert_eq!(sqlite_file("postgres://x"), None);
    }

    #[test]
    fn prune_keeps_newest_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(10 * 86_400);
        // file names deliberately out of mtime order
        let names = [
            ("relay_20250105.db", 1),
            ("relay_20250101.db", 5),
            ("relay_20250103.db", 3),
            ("relay_20250102.db", 4),
            ("relay_20250104.db", 2),
        ];
        for (name, age_days) in names {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            let f = fs::File::options().write(true).open(&path).unwrap();
            f.set_modified(base + Duration::from_secs((10 - age_days) * 86_400)).unwrap();
        }
        fs::write(dir.path().join("other_20250101.db"), "x").unwrap();
        fs::write(dir.path().join("relay_notes.txt"), "x").unwrap();

        let removed = prune_backups(dir.path(), "relay", 3).unwrap();
        let mut removed: Vec<_> = removed
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["relay_20250101.db", "relay_20250102.db"]);

        let mut left: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "other_20250101.db",
                "relay_20250103.db",
                "relay_20250104.db",
                "relay_20250105.db",
                "relay_notes.txt"
            ]
        );
    }

    #[test]
    fn prune_under_limit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("relay_20250101.db"), "x").unwrap();
        assert!(prune_backups(dir.path(), "relay", 3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_database_writes_a_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/live.db", dir.path().display());
        let pool = crate::db::init_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();

        let dest = dir.path().join("backups").join("live_20250304.db");
        let size = copy_database(&pool, &dest).await.unwrap();
        assert!(size > 0);
        // a second copy on the same day replaces the first
        copy_database(&pool, &dest).await.unwrap();
        assert!(dest.exists());
    }
}
