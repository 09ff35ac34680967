use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::model::WebhookText;
use super::Notifier;

/// Posts `{"msg_type":"text","content":{"text":...}}` to a chat webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// A blank `url` yields a notifier that only logs.
    pub fn new(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
        Ok(Self { http, url })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let Some(url) = &self.url else {
            warn!(chars = text.chars().count(), "webhook not configured; skipping notification");
            return Ok(());
        };
        let resp = self
            .http
            .post(url)
            .json(&WebhookText::new(text))
            .send()
            .await
            .context("failed to reach webhook")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("webhook returned {status}: {body}");
        }
        info!("notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let v = serde_json::to_value(WebhookText::new("hi")).unwrap();
        assert_eq!(v, serde_json::json!({"msg_type": "text", "content": {"text": "hi"}}));
    }

    #[tokio::test]
    async fn unconfigured_webhook_is_not_an_error() {
        let n = WebhookNotifier::new("  ").unwrap();
        assert!(!n.is_configured());
        n.notify("message").await.unwrap();
    }
}
