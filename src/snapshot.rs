use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

/// File name for an identity's snapshot. Characters outside `[A-Za-z0-9._-]`
/// become `_` so URL identities still map to a single flat file.
pub fn snapshot_file_name(identity: &str) -> String {
    let stem: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.jpg")
}

/// Write JPEG bytes to `{dir}/{identity}.jpg`, creating `dir` if needed.
/// Returns the written path. Existing files are overwritten with the newer capture.
pub async fn store_snapshot(dir: &Path, identity: &str, bytes: &[u8]) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(anyhow!("empty snapshot for {identity}"));
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create snapshot dir: {}", dir.display()))?;

    let path = dir.join(snapshot_file_name(identity));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_flat() {
        assert_eq!(snapshot_file_name("1790000000000000000"), "1790000000000000000.jpg");
        assert_eq!(
            snapshot_file_name("https://a.b/zwgk/zcfb/x.html"),
            "https___a.b_zwgk_zcfb_x.html.jpg"
        );
    }

    #[tokio::test]
    async fn writes_into_created_dir() {
        let td = tempfile::tempdir().unwrap();
        let dir = td.path().join("shots");
        let p = store_snapshot(&dir, "42", b"\xff\xd8jpeg").await.unwrap();
        assert_eq!(p, dir.join("42.jpg"));
        assert_eq!(std::fs::read(&p).unwrap(), b"\xff\xd8jpeg");

        assert!(store_snapshot(&dir, "43", b"").await.is_err());
    }
}
