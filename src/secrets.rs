//! Credential leak scanner for files about to be committed.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::path::Path;

const SKIPPED_EXTENSIONS: [&str; 5] = ["db", "sqlite", "jpg", "png", "gif"];
const PREVIEW_LIMIT: usize = 50;

static PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"LTAI[\w]{16,}", "access key id"),
        (r"sk-[\w]{32,}", "api key"),
        (r"https://[^\s]*webhook[^\s]*", "webhook url"),
        (r#"access_key_secret.*["'][\w+/=]{20,}["']"#, "access key secret"),
    ]
    .into_iter()
    .map(|(pat, kind)| {
        let re = RegexBuilder::new(pat)
            .case_insensitive(true)
            .build()
            .expect("secret pattern");
        (re, kind)
    })
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub line: usize,
    pub kind: &'static str,
    /// Matched text, cut to 50 characters.
    pub preview: String,
}

/// Binary files and `*.example` templates are never scanned.
pub fn should_scan(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if name.ends_with(".example") {
        return false;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    !SKIPPED_EXTENSIONS.contains(&ext.as_str())
}

/// Every match of every pattern, grouped by pattern, with 1-based lines.
pub fn scan_text(content: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (re, kind) in PATTERNS.iter() {
        for m in re.find_iter(content) {
            let line = content[..m.start()].matches('\n').count() + 1;
            let text = m.as_str();
            let preview = if text.chars().count() > PREVIEW_LIMIT {
                format!("{}...", text.chars().take(PREVIEW_LIMIT).collect::<String>())
            } else {
                text.to_string()
            };
            findings.push(Finding {
                line,
                kind,
                preview,
            });
        }
    }
    findings
}

/// Scan one file. Unreadable or non-UTF-8 files yield nothing.
pub fn scan_file(path: &Path) -> Vec<Finding> {
    if !should_scan(path) {
        return Vec::new();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => scan_text(&content),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_each_kind() {
        let content = "\
app:
  data_dir: ./data
object_store:
  access_key_id: LTAI5tAbCdEfGhIjKlMnOpQr
  access_key_secret: \"AbCdEfGhIjKlMnOpQrStUvWx12\"
ai:
  api_key: sk-0123456789abcdef0123456789abcdef
notify:
  timeline_webhook: https://open.feishu.cn/open-apis/bot/v2/hook/webhook-123
";
        let findings = scan_text(content);
        let kinds: Vec<_> = findings.iter().map(|f| (f.line, f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (4, "access key id"),
                (7, "api key"),
                (9, "webhook url"),
                (5, "access key secret"),
            ]
        );
    }

    #[test]
    fn clean_text_and_short_keys_pass() {
        assert!(scan_text("api_key: sk-short\naccess_key_id: \"\"\n").is_empty());
        assert!(scan_text("see http://example.com/webhook for docs").is_empty());
    }

    #[test]
    fn long_matches_are_cut() {
        let url = format!("https://hooks.example.com/webhook/{}", "a".repeat(80));
        let f = &scan_text(&url)[0];
        assert_eq!(f.preview.chars().count(), PREVIEW_LIMIT + 3);
        assert!(f.preview.ends_with("..."));
    }

    #[test]
    fn skip_rules() {
        assert!(!should_scan(Path::new("data/signal-relay.db")));
        assert!(!should_scan(Path::new("shots/1.JPG")));
        assert!(!should_scan(Path::new("config.yaml.example")));
        assert!(should_scan(Path::new("config.yaml")));
        assert!(should_scan(Path::new("Makefile")));
    }

    #[test]
    fn scans_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let leaked = dir.path().join("config.yaml");
        std::fs::write(&leaked, "ai:\n  api_key: sk-0123456789abcdef0123456789abcdef\n").unwrap();
        let template = dir.path().join("config.yaml.example");
        std::fs::write(&template, "ai:\n  api_key: sk-0123456789abcdef0123456789abcdef\n").unwrap();

        assert_eq!(scan_file(&leaked).len(), 1);
        assert!(scan_file(&template).is_empty());
        assert!(scan_file(&dir.path().join("missing.yaml")).is_empty());
    }
}
