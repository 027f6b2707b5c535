//! Text embedding service.
//!
//! The `EmbeddingService` trait abstracts the provider; `ApiEmbeddingService`
//! talks to an OpenAI-compatible `/embeddings` endpoint and
//! `NoopEmbeddingService` stands in when nothing is configured.

pub mod api;
pub mod provider;

use async_trait::async_trait;

use crate::TaleforgeError;

pub use api::ApiEmbeddingService;
pub use provider::{create_embedding_service, load_provider_config, EmbeddingProviderConfig};

/// No-op embedding service.
///
/// Always reports as unavailable and returns errors for embed operations.
pub struct NoopEmbeddingService;

impl Default for NoopEmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopEmbeddingService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddingService for NoopEmbeddingService {
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, TaleforgeError> {
        Err(TaleforgeError::service(
            "embedding",
            "Embedding service is not available (noop)",
        ))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, TaleforgeError> {
        Err(TaleforgeError::service(
            "embedding",
            "Embedding service is not available (noop)",
        ))
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Service trait for generating text embeddings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate embedding for a single text string.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, TaleforgeError>;

    /// Generate embeddings for multiple texts in batch, one per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TaleforgeError>;

    /// Fixed vector length produced by this service.
    fn dimensions(&self) -> usize;

    /// False when no provider is configured or it has been marked down.
    fn is_available(&self) -> bool;
}
