//! Wire types for the chat-completions and webhook endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookText<'a> {
    pub msg_type: &'static str,
    pub content: WebhookContent<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookContent<'a> {
    pub text: &'a str,
}

impl<'a> WebhookText<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            msg_type: "text",
            content: WebhookContent { text },
        }
    }
}
