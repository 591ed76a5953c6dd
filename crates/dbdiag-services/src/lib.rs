//! # dbdiag-services
//!
//! Clients for the external AI collaborators: an OpenAI-compatible chat
//! completion API and an embedding API. Both are reached only through the
//! `ChatModel` / `Embedder` traits so the engine and the index builder can
//! run against mocks in tests.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod embedding;
pub mod llm;
pub mod retry;

use async_trait::async_trait;
use dbdiag_core::Result;
use serde::{Deserialize, Serialize};

/// One message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Black-box chat LLM: `llm_chat(messages, schema?) → text | json`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Free-form completion.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Schema-constrained completion. The returned value is parsed JSON;
    /// a malformed response is retried once with a repair prompt, then
    /// surfaces as a permanent upstream error.
    async fn chat_json(&self, messages: &[ChatMessage]) -> Result<serde_json::Value>;
}

/// Black-box embedding service: `embed(text) → float[D]`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed dimension D for this deployment.
    fn dimension(&self) -> usize;
}

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::embedding::HttpEmbedder;
    pub use crate::llm::HttpChatModel;
    pub use crate::{ChatMessage, ChatModel, Embedder};
}

/// Strip a Markdown code fence (```json ... ```) an LLM may wrap around
/// structured output.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
