use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::model::{ChatMessage, ChatRequest, ChatResponse};
use super::{Summary, SummaryInput, Summarizer};
use crate::config;

/// Client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiSummarizer {
    http: Client,
    base_url: Url,
    api_key: String,
    vision_model: String,
    text_model: String,
    temperature: Option<f32>,
}

impl fmt::Debug for OpenAiSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiSummarizer")
            .field("base_url", &self.base_url)
            .field("vision_model", &self.vision_model)
            .field("text_model", &self.text_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiSummarizer {
    pub fn from_config(cfg: &config::Ai) -> Result<Self> {
        // join() would drop the last path segment without the trailing slash
        let base = format!("{}/", cfg.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base).with_context(|| format!("invalid ai.base_url {base}"))?;
        let http = Client::builder()
            .user_agent("signal-relay/0.1")
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            vision_model: cfg.vision_model.clone(),
            text_model: cfg.text_model.clone(),
            temperature: cfg.temperature,
        })
    }

    pub fn chat_request(&self, instructions: &str, input: &SummaryInput<'_>) -> ChatRequest {
        let (model, user) = match input {
            SummaryInput::ImageUrl(url) => (
                &self.vision_model,
                json!([{ "type": "image_url", "image_url": { "url": url } }]),
            ),
            SummaryInput::Text(text) => (&self.text_model, json!(text.trim())),
        };
        ChatRequest {
            model: model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: json!(instructions.trim()),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        }
    }

    pub fn build_request(&self, body: &ChatRequest) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("chat/completions")
            .context("invalid ai base URL")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build chat request")
    }
}

/// First choice's message text, trimmed.
pub fn response_text(raw: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(raw).context("invalid chat response JSON")?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("chat response has no choices"))?;
    Ok(text.trim().to_string())
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, instructions: &str, input: SummaryInput<'_>) -> Result<Summary> {
        let body = self.chat_request(instructions, &input);
        debug!(model = %body.model, "chat request");
        let request = self.build_request(&body)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach summarization service")?;

        let status = res.status();
        let raw = res.text().await.context("failed to read chat response")?;
        if !status.is_success() {
            warn!(%status, "summarization service error");
            return Err(anyhow!("chat completions error ({status}): {raw}"));
        }
        let text = response_text(&raw)?;
        Ok(Summary { text, raw })
    }
}
