//! Embedding provider configuration and factory.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{load_layered, RetryPolicy};
use crate::embedding::{ApiEmbeddingService, EmbeddingService, NoopEmbeddingService};
use crate::TaleforgeError;

/// Embedding provider configuration.
///
/// Loaded from `{data_path}/embedding.toml` or `TALEFORGE_EMBEDDING_PROVIDER` (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmbeddingProviderConfig {
    Disabled,
    /// Any server speaking the OpenAI `/embeddings` protocol.
    OpenAiCompatible {
        endpoint: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default = "default_dimensions")]
        dimensions: usize,
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
    },
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self::Disabled
    }
}

pub fn load_provider_config(data_path: &Path) -> EmbeddingProviderConfig {
    load_layered(data_path, "embedding.toml", "TALEFORGE_EMBEDDING_PROVIDER")
}

/// Create an embedding service from provider configuration.
pub fn create_embedding_service(
    config: &EmbeddingProviderConfig,
    retry: &RetryPolicy,
) -> Result<Arc<dyn EmbeddingService>, TaleforgeError> {
    match config {
        EmbeddingProviderConfig::Disabled => Ok(Arc::new(NoopEmbeddingService::new())),
        EmbeddingProviderConfig::OpenAiCompatible {
            endpoint,
            model,
            dimensions,
            api_key_env,
        } => {
            info!("Embeddings: {} ({} dims) at {}", model, dimensions, endpoint);
            Ok(Arc::new(ApiEmbeddingService::new(
                endpoint.clone(),
                model.clone(),
                std::env::var(api_key_env).ok(),
                *dimensions,
                retry.clone(),
            )?))
        }
    }
}
