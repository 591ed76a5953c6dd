//! HTTP chat-completion client (OpenAI-compatible).

use crate::retry::with_retry;
use crate::{strip_code_fence, ChatMessage, ChatModel};
use async_trait::async_trait;
use dbdiag_core::config::LlmConfig;
use dbdiag_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Chat client against `POST {api_base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct HttpChatModel {
    config: LlmConfig,
    client: reqwest::Client,
}

impl HttpChatModel {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout("chat completion request timed out")
                } else {
                    Error::upstream(format!("chat completion request failed: {e}"))
                }
            })?;

        match response.status().as_u16() {
            200 => {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::upstream(format!("malformed chat response: {e}")))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| Error::upstream_permanent("chat response contained no content"))
            }
            401 | 403 => Err(Error::upstream_permanent("chat API authentication failed")),
            429 => Err(Error::upstream("chat API rate limited")),
            400 => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::upstream_permanent(format!(
                    "chat API rejected request: {body}"
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::upstream(format!("chat API status {status}: {body}")))
            }
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    #[instrument(skip(self, messages), fields(model = %self.config.model, messages = messages.len()))]
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let text = with_retry(&self.config.retry, "chat", || self.complete_once(messages)).await?;
        debug!(chars = text.len(), "chat completion received");
        Ok(text)
    }

    async fn chat_json(&self, messages: &[ChatMessage]) -> Result<serde_json::Value> {
        let text = self.chat(messages).await?;
        let first_try: std::result::Result<serde_json::Value, _> =
            serde_json::from_str(strip_code_fence(&text));
        let first_err = match first_try {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        debug!(error = %first_err, "structured output malformed, sending repair prompt");
        let mut repair = messages.to_vec();
        repair.push(ChatMessage {
            role: "assistant".to_string(),
            content: text,
        });
        repair.push(ChatMessage::user(
            "上面的回复不是合法的 JSON。请只输出符合要求的 JSON，不要任何其他内容。",
        ));
        let retried = self.chat(&repair).await?;
        serde_json::from_str(strip_code_fence(&retried)).map_err(|e| {
            Error::upstream_permanent(format!("structured output still malformed: {e}"))
        })
    }
}
