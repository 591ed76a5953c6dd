//! HTTP embedding client (OpenAI-compatible).

use crate::retry::with_retry;
use crate::Embedder;
use async_trait::async_trait;
use dbdiag_core::config::EmbeddingConfig;
use dbdiag_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding client against `POST {api_base}/embeddings`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(Error::config("embedding.dimension must be positive"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
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
                    Error::timeout("embedding request timed out")
                } else {
                    Error::upstream(format!("embedding request failed: {e}"))
                }
            })?;

        match response.status().as_u16() {
            200 => {
                let parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::upstream(format!("malformed embedding response: {e}")))?;
                if parsed.data.len() != texts.len() {
                    return Err(Error::upstream_permanent(format!(
                        "embedding API returned {} vectors for {} inputs",
                        parsed.data.len(),
                        texts.len()
                    )));
                }
                let mut data = parsed.data;
                data.sort_by_key(|d| d.index);
                for d in &data {
                    if d.embedding.len() != self.config.dimension {
                        return Err(Error::upstream_permanent(format!(
                            "embedding dimension {} does not match configured {}",
                            d.embedding.len(),
                            self.config.dimension
                        )));
                    }
                }
                Ok(data.into_iter().map(|d| d.embedding).collect())
            }
            401 | 403 => Err(Error::upstream_permanent(
                "embedding API authentication failed",
            )),
            429 => Err(Error::upstream("embedding API rate limited")),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::upstream(format!(
                    "embedding API status {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let mut vectors =
            with_retry(&self.config.retry, "embed", || self.embed_chunk(&texts)).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::upstream_permanent("embedding API returned no vector"))
    }

    #[instrument(skip(self, texts), fields(texts = texts.len(), batch_size = self.config.batch_size))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let vectors =
                with_retry(&self.config.retry, "embed_batch", || self.embed_chunk(chunk)).await?;
            out.extend(vectors);
            debug!(done = out.len(), total = texts.len(), "embedding progress");
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
