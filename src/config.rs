//! Configuration loader and validator.
//!
//! Resolution order: YAML file (optional) → environment overrides → validation.
//! The result is built once in `main` and passed by reference to every
//! component constructor.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::fetcher::Pacing;
use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for environment variable {key}: {value:?}")]
    Env { key: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub timeline: Timeline,
    pub bulletin: Bulletin,
    pub render: Render,
    pub object_store: ObjectStore,
    pub ai: Ai,
    pub notify: Notify,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub data_dir: String,
    /// Overrides `sqlite://{data_dir}/signal-relay.db` when set.
    pub database_url: Option<String>,
    /// How many recent identities per origin feed the dedupe filter.
    pub known_window: u32,
    pub backup_dir: String,
    pub backup_keep: usize,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            database_url: None,
            known_window: 300,
            backup_dir: "./data/backups".into(),
            backup_keep: 3,
        }
    }
}

/// Inter-request delay bounds, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delay {
    pub min_ms: u64,
    pub max_ms: u64,
}

/// Profile timeline source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeline {
    pub handle: String,
    pub cookie_file: String,
    pub snapshot_dir: String,
    pub max_detail_pages: usize,
    pub delay: Delay,
    pub timeout_ms: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            handle: "elonmusk".into(),
            cookie_file: "config/twitter_cookies.json".into(),
            snapshot_dir: "screenshots".into(),
            max_detail_pages: 10,
            delay: Delay {
                min_ms: 2000,
                max_ms: 4000,
            },
            timeout_ms: 60_000,
        }
    }
}

/// Ministry bulletin listing source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Bulletin {
    pub list_url: String,
    pub feed_name: String,
    /// Only keep listing entries published today (local date).
    pub today_only: bool,
    pub page_size: u32,
    pub max_detail_pages: usize,
    pub delay: Delay,
    pub timeout_ms: u64,
}

impl Default for Bulletin {
    fn default() -> Self {
        Self {
            list_url: "https://www.mofcom.gov.cn/zwgk/zcfb/index.html".into(),
            feed_name: "mofcom".into(),
            today_only: true,
            page_size: 15,
            max_detail_pages: 15,
            delay: Delay {
                min_ms: 800,
                max_ms: 1500,
            },
            timeout_ms: 20_000,
        }
    }
}

/// Headless rendering service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Render {
    pub base_url: String,
    pub token: Option<String>,
}

impl Default for Render {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            token: None,
        }
    }
}

/// S3-compatible bucket that hosts snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObjectStore {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,
    pub region: String,
    /// Defaults to `https://{bucket}.oss-{region}.aliyuncs.com`.
    pub endpoint: Option<String>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            access_key_secret: String::new(),
            bucket: "signal-relay".into(),
            region: "cn-hangzhou".into(),
            endpoint: None,
        }
    }
}

impl ObjectStore {
    pub fn resolved_endpoint(&self) -> String {
        match self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://{}.oss-{}.aliyuncs.com", self.bucket, self.region),
        }
    }
}

/// OpenAI-compatible summarization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Ai {
    pub api_key: String,
    pub base_url: String,
    pub vision_model: String,
    pub text_model: String,
    pub timeout_seconds: u64,
    pub temperature: Option<f32>,
    pub retry: Retry,
}

impl Default for Ai {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            vision_model: "qwen-vl-plus".into(),
            text_model: "qwen-plus".into(),
            timeout_seconds: 120,
            temperature: Some(0.3),
            retry: Retry::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Retry {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
    pub max_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
            backoff: Backoff::Fixed,
            max_delay_ms: 60_000,
        }
    }
}

/// Chat webhooks. Empty means "log and skip".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Notify {
    pub timeline_webhook: String,
    pub bulletin_webhook: String,
}

impl Config {
    /// Ensure required directories exist (data, backups, snapshots).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [
            &self.app.data_dir,
            &self.app.backup_dir,
            &self.timeline.snapshot_dir,
        ] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        match self.app.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => format!(
                "sqlite://{}/signal-relay.db",
                self.app.data_dir.trim_end_matches('/')
            ),
        }
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        PathBuf::from(&self.timeline.snapshot_dir)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.ai.retry;
        RetryPolicy {
            max_attempts: r.max_attempts,
            delay: Duration::from_millis(r.delay_ms),
            backoff: r.backoff,
            max_delay: Duration::from_millis(r.max_delay_ms),
        }
    }

    /// Credentials the timeline pipeline cannot run without.
    pub fn require_timeline(&self) -> Result<(), ConfigError> {
        if self.timeline.handle.trim().is_empty() {
            return Err(ConfigError::Invalid("timeline.handle must be non-empty"));
        }
        if self.timeline.cookie_file.trim().is_empty() {
            return Err(ConfigError::Invalid("timeline.cookie_file must be non-empty"));
        }
        if self.render.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("render.base_url must be non-empty"));
        }
        if self.object_store.access_key_id.trim().is_empty()
            || self.object_store.access_key_secret.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "object_store.access_key_id and object_store.access_key_secret must be non-empty",
            ));
        }
        if self.object_store.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("object_store.bucket must be non-empty"));
        }
        self.require_ai()
    }

    /// Credentials the bulletin pipeline cannot run without.
    pub fn require_bulletin(&self) -> Result<(), ConfigError> {
        if self.bulletin.list_url.trim().is_empty() {
            return Err(ConfigError::Invalid("bulletin.list_url must be non-empty"));
        }
        self.require_ai()
    }

    fn require_ai(&self) -> Result<(), ConfigError> {
        if self.ai.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("ai.api_key must be non-empty"));
        }
        Ok(())
    }
}

/// Load configuration from an optional YAML file, overlay the process
/// environment and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - A missing file yields the defaults.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load`] with an injectable environment lookup.
pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let mut cfg = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content)?
    } else {
        Config::default()
    };
    apply_env(&mut cfg, env)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn apply_env<F>(cfg: &mut Config, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("TWITTER_USER") {
        cfg.timeline.handle = v;
    }
    if let Some(v) = get("TWITTER_COOKIE_FILE") {
        cfg.timeline.cookie_file = v;
    }
    if let Some(v) = get("TWITTER_SCREENSHOT_DIR") {
        cfg.timeline.snapshot_dir = v;
    }
    if let Some(v) = get("TWITTER_MAX_DETAIL_PAGES") {
        cfg.timeline.max_detail_pages = parse_num("TWITTER_MAX_DETAIL_PAGES", v)?;
    }
    if let Some(v) = get("TWITTER_TIMEOUT") {
        cfg.timeline.timeout_ms = parse_num("TWITTER_TIMEOUT", v)?;
    }
    if let Some(v) = get("TWITTER_KNOWN_WINDOW") {
        cfg.app.known_window = parse_num("TWITTER_KNOWN_WINDOW", v)?;
    }
    if let Some(v) = get("RENDER_BASE_URL") {
        cfg.render.base_url = v;
    }
    if let Some(v) = get("RENDER_TOKEN") {
        cfg.render.token = Some(v);
    }
    if let Some(v) = get("OSS_ACCESS_KEY_ID") {
        cfg.object_store.access_key_id = v;
    }
    if let Some(v) = get("OSS_ACCESS_KEY_SECRET") {
        cfg.object_store.access_key_secret = v;
    }
    if let Some(v) = get("OSS_BUCKET") {
        cfg.object_store.bucket = v;
    }
    if let Some(v) = get("OSS_REGION") {
        cfg.object_store.region = v;
    }
    if let Some(v) = get("OSS_ENDPOINT") {
        cfg.object_store.endpoint = Some(v);
    }
    if let Some(v) = get("QIANWEN_API_KEY") {
        cfg.ai.api_key = v;
    }
    if let Some(v) = get("QIANWEN_BASE_URL") {
        cfg.ai.base_url = v;
    }
    if let Some(v) = get("QIANWEN_MODEL") {
        cfg.ai.vision_model = v;
    }
    if let Some(v) = get("QIANWEN_TIMEOUT") {
        cfg.ai.timeout_seconds = parse_num("QIANWEN_TIMEOUT", v)?;
    }
    if let Some(v) = get("TWITTER_FEISHU_WEBHOOK") {
        cfg.notify.timeline_webhook = v;
    }
    if let Some(v) = get("FEISHU_WEBHOOK") {
        cfg.notify.bulletin_webhook = v;
    }
    if let Some(v) = get("DATABASE_URL") {
        cfg.app.database_url = Some(v);
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.known_window == 0 {
        return Err(ConfigError::Invalid("app.known_window must be > 0"));
    }
    if cfg.app.backup_keep == 0 {
        return Err(ConfigError::Invalid("app.backup_keep must be > 0"));
    }

    if cfg.timeline.max_detail_pages == 0 {
        return Err(ConfigError::Invalid("timeline.max_detail_pages must be > 0"));
    }
    if cfg.timeline.delay.min_ms > cfg.timeline.delay.max_ms {
        return Err(ConfigError::Invalid(
            "timeline.delay.min_ms must be <= timeline.delay.max_ms",
        ));
    }
    if cfg.timeline.snapshot_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("timeline.snapshot_dir must be non-empty"));
    }

    if cfg.bulletin.max_detail_pages == 0 {
        return Err(ConfigError::Invalid("bulletin.max_detail_pages must be > 0"));
    }
    if cfg.bulletin.delay.min_ms > cfg.bulletin.delay.max_ms {
        return Err(ConfigError::Invalid(
            "bulletin.delay.min_ms must be <= bulletin.delay.max_ms",
        ));
    }
    if cfg.bulletin.feed_name.trim().is_empty() {
        return Err(ConfigError::Invalid("bulletin.feed_name must be non-empty"));
    }

    if cfg.ai.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("ai.retry.max_attempts must be >= 1"));
    }
    if cfg.ai.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("ai.timeout_seconds must be > 0"));
    }

    Ok(())
}

impl From<Delay> for Pacing {
    fn from(d: Delay) -> Self {
        Pacing::new(Duration::from_millis(d.min_ms), Duration::from_millis(d.max_ms))
    }
}

/// Returns an example YAML configuration with every section filled in.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  known_window: 300
  backup_dir: "./data/backups"
  backup_keep: 3

timeline:
  handle: "elonmusk"
  cookie_file: "config/twitter_cookies.json"
  snapshot_dir: "screenshots"
  max_detail_pages: 10
  delay:
    min_ms: 2000
    max_ms: 4000
  timeout_ms: 60000

bulletin:
  list_url: "https://www.mofcom.gov.cn/zwgk/zcfb/index.html"
  feed_name: "mofcom"
  today_only: true
  page_size: 15
  max_detail_pages: 15
  delay:
    min_ms: 800
    max_ms: 1500
  timeout_ms: 20000

render:
  base_url: "http://localhost:3000"
  token: "YOUR_RENDER_TOKEN"

object_store:
  access_key_id: "YOUR_ACCESS_KEY_ID"
  access_key_secret: "YOUR_ACCESS_KEY_SECRET"
  bucket: "signal-relay"
  region: "cn-hangzhou"

ai:
  api_key: "YOUR_AI_API_KEY"
  base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1"
  vision_model: "qwen-vl-plus"
  text_model: "qwen-plus"
  timeout_seconds: 120
  temperature: 0.3
  retry:
    max_attempts: 3
    delay_ms: 2000
    backoff: fixed
    max_delay_ms: 60000

notify:
  timeline_webhook: "https://open.feishu.cn/open-apis/bot/v2/hook/TIMELINE"
  bulletin_webhook: "https://open.feishu.cn/open-apis/bot/v2/hook/BULLETIN"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn example_file_matches_builtin() {
        assert_eq!(include_str!("../config.yaml.example"), example());
    }

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        cfg.require_timeline().unwrap();
        cfg.require_bulletin().unwrap();
        assert_eq!(cfg.ai.retry.backoff, Backoff::Fixed);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let td = tempdir().unwrap();
        let cfg = load_with_env(Some(&td.path().join("absent.yaml")), no_env).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.app.known_window, 300);
        assert_eq!(cfg.database_url(), "sqlite://./data/signal-relay.db");
    }

    #[test]
    fn env_overrides_file() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("TWITTER_USER", "someone"),
            ("TWITTER_MAX_DETAIL_PAGES", "4"),
            ("QIANWEN_API_KEY", "sk-env"),
            ("OSS_BUCKET", "other-bucket"),
            ("FEISHU_WEBHOOK", ""),
        ]);
        let cfg = load_with_env(Some(&p), |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(cfg.timeline.handle, "someone");
        assert_eq!(cfg.timeline.max_detail_pages, 4);
        assert_eq!(cfg.ai.api_key, "sk-env");
        assert_eq!(cfg.object_store.bucket, "other-bucket");
        // empty env values do not clobber the file
        assert_eq!(
            cfg.notify.bulletin_webhook,
            "https://open.feishu.cn/open-apis/bot/v2/hook/BULLETIN"
        );
    }

    #[test]
    fn bad_numeric_env_is_reported() {
        let td = tempdir().unwrap();
        let err = load_with_env(Some(&td.path().join("none.yaml")), |k| {
            (k == "TWITTER_MAX_DETAIL_PAGES").then(|| "ten".to_string())
        })
        .unwrap_err();
        match err {
            ConfigError::Env { key, value } => {
                assert_eq!(key, "TWITTER_MAX_DETAIL_PAGES");
                assert_eq!(value, "ten");
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn invalid_tunables() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.timeline.max_detail_pages = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("timeline.max_detail_pages")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.bulletin.delay = Delay {
            min_ms: 10,
            max_ms: 5,
        };
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ai.retry.max_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.known_window = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_credentials_are_fatal_per_source() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.object_store.access_key_secret = "".into();
        let err = cfg.require_timeline().unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("object_store")),
            _ => panic!("wrong error"),
        }
        // the bulletin pipeline never uploads
        cfg.require_bulletin().unwrap();

        cfg.ai.api_key = " ".into();
        assert!(matches!(cfg.require_bulletin(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn object_store_endpoint_defaults_to_bucket_host() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(
            cfg.object_store.resolved_endpoint(),
            "https://signal-relay.oss-cn-hangzhou.aliyuncs.com"
        );
        cfg.object_store.endpoint = Some("http://127.0.0.1:9000/bucket/".into());
        assert_eq!(
            cfg.object_store.resolved_endpoint(),
            "http://127.0.0.1:9000/bucket"
        );
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.app.backup_dir = td.path().join("data/backups").to_string_lossy().to_string();
        cfg.timeline.snapshot_dir = td.path().join("shots").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data/backups").exists());
        assert!(td.path().join("shots").exists());
    }
}
