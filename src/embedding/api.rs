//! OpenAI-compatible `/embeddings` client with bounded retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RetryPolicy;
use crate::embedding::EmbeddingService;
use crate::llm::openai::classify_status;
use crate::utils::retry::with_backoff;
use crate::TaleforgeError;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct ApiEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    retry: RetryPolicy,
    available: AtomicBool,
}

impl ApiEmbeddingService {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
        retry: RetryPolicy,
    ) -> Result<Self, TaleforgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| TaleforgeError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dimensions,
            retry,
            available: AtomicBool::new(true),
        })
    }

    /// Re-enable after the provider was marked down.
    pub fn reset_availability(&self) {
        self.available.store(true, Ordering::Relaxed);
    }

    async fn send(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TaleforgeError> {
        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("embedding", status, body));
        }

        let mut parsed: EmbedResponse = response.json().await.map_err(|e| {
            TaleforgeError::service("embedding", format!("JSON parse error: {e}"))
        })?;
        parsed.data.sort_by_key(|d| d.index.unwrap_or(0));
        if parsed.data.len() != texts.len() {
            return Err(TaleforgeError::service(
                "embedding",
                format!("expected {} vectors, got {}", texts.len(), parsed.data.len()),
            ));
        }

        let dims = self.dimensions;
        Ok(parsed
            .data
            .into_iter()
            .map(|d| {
                let mut v = d.embedding;
                v.resize(dims, 0.0);
                v
            })
            .collect())
    }
}

#[async_trait]
impl EmbeddingService for ApiEmbeddingService {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, TaleforgeError> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| TaleforgeError::service("embedding", "empty response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TaleforgeError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.available.load(Ordering::Relaxed) {
            return Err(TaleforgeError::service(
                "embedding",
                "provider marked unavailable",
            ));
        }

        match with_backoff(&self.retry, "embedding request", || self.send(texts)).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                if e.is_transient() {
                    warn!(error = %e, "embedding retries exhausted");
                } else {
                    warn!(error = %e, "embedding provider rejected request; marking unavailable");
                    self.available.store(false, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }
}
