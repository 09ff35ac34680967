//! Client for a Browserless-style headless rendering service.
//!
//! `POST {base}/content` returns rendered HTML, `POST {base}/screenshot`
//! returns image bytes. Session cookies are injected on every request.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::fetcher::FetchError;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("render service rejected credentials (status {0})")]
    Unauthorized(u16),
    #[error("cookie file {path}: {reason}")]
    Cookies { path: String, reason: String },
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Network(err.to_string())
    }
}

impl From<RenderError> for FetchError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Unauthorized(_) | RenderError::Cookies { .. } => {
                FetchError::Session(err.to_string())
            }
            other => FetchError::Transient(other.to_string()),
        }
    }
}

/// Load an exported cookie jar: a non-empty JSON array of objects that each
/// carry string `name` and `value` fields. Anything else is a fatal
/// precondition failure.
pub fn load_cookies(path: &Path) -> Result<Vec<Value>, RenderError> {
    let fail = |reason: String| RenderError::Cookies {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))?;
    let Value::Array(cookies) = parsed else {
        return Err(fail("expected a JSON array".into()));
    };
    if cookies.is_empty() {
        return Err(fail("no cookies".into()));
    }
    for (idx, c) in cookies.iter().enumerate() {
        let has = |k: &str| c.get(k).and_then(Value::as_str).is_some();
        if !has("name") || !has("value") {
            return Err(fail(format!("cookie #{idx} lacks name/value")));
        }
    }
    Ok(cookies)
}

/// Capture options for `/screenshot`.
#[derive(Debug, Clone, Serialize)]
pub struct Capture<'a> {
    /// Element to clip to; the full viewport when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<&'a str>,
    pub quality: u8,
}

pub struct RenderClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cookies: Vec<Value>,
    timeout: Duration,
}

impl RenderClient {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        cookies: Vec<Value>,
        timeout: Duration,
    ) -> Result<Self, RenderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(String::from),
            cookies,
            timeout,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    fn body(&self, url: &str, wait_for: Option<&str>) -> Value {
        let timeout_ms = self.timeout.as_millis() as u64;
        let mut body = json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2", "timeout": timeout_ms },
        });
        if !self.cookies.is_empty() {
            body["cookies"] = Value::Array(self.cookies.clone());
        }
        if let Some(selector) = wait_for {
            body["waitForSelector"] = json!({ "selector": selector, "timeout": timeout_ms });
        }
        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, RenderError> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RenderError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// Fully rendered HTML for `url`.
    pub async fn content(&self, url: &str, wait_for: Option<&str>) -> Result<String, RenderError> {
        let resp = self.post("content", &self.body(url, wait_for)).await?;
        Ok(resp.text().await?)
    }

    /// JPEG capture of `url`.
    pub async fn screenshot(
        &self,
        url: &str,
        wait_for: Option<&str>,
        capture: Capture<'_>,
    ) -> Result<Vec<u8>, RenderError> {
        let mut body = self.body(url, wait_for);
        body["options"] = json!({ "type": "jpeg", "quality": capture.quality });
        if let Some(selector) = capture.selector {
            body["selector"] = json!(selector);
        }
        let resp = self.post("screenshot", &body).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}
