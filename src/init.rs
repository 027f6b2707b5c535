//! Shared initialization for CLI commands and embedders of the library.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{load_pipeline_config, PipelineConfig};
use crate::db::{apply_schema, init_db, load_db_config, WorldDb};
use crate::embedding::{create_embedding_service, load_provider_config, EmbeddingService};
use crate::llm::{create_llm_service, load_llm_config, LlmService};
use crate::services::Pipeline;
use crate::store::SurrealWorldStore;

/// Stores, remote services and configuration for one process.
pub struct AppContext {
    pub db: Arc<WorldDb>,
    pub data_path: PathBuf,
    pub store: Arc<SurrealWorldStore>,
    pub llm: Arc<dyn LlmService>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub config: PipelineConfig,
}

/// Data path priority: explicit path > TALEFORGE_DATA_PATH env > ./.taleforge (if exists) > ~/.taleforge
pub fn resolve_data_path(explicit_path: Option<PathBuf>) -> PathBuf {
    explicit_path
        .or_else(|| std::env::var("TALEFORGE_DATA_PATH").ok().map(PathBuf::from))
        .or_else(|| {
            let local_path = Path::new(".taleforge");
            if local_path.exists() && local_path.is_dir() {
                Some(local_path.to_path_buf())
            } else {
                None
            }
        })
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".taleforge"))
                .unwrap_or_else(|| PathBuf::from(".taleforge"))
        })
}

impl AppContext {
    pub async fn new(explicit_path: Option<PathBuf>) -> Result<Self> {
        let data_path = resolve_data_path(explicit_path);
        std::fs::create_dir_all(&data_path)?;
        tracing::info!("Using data path: {}", data_path.display());

        let config = load_pipeline_config(&data_path);

        let db = init_db(&load_db_config(&data_path), &data_path).await?;
        tracing::info!("Database connected");
        apply_schema(&db).await?;
        tracing::info!("Schema applied");
        let db = Arc::new(db);
        let store = Arc::new(SurrealWorldStore::new(db.clone()));

        let embedder = create_embedding_service(&load_provider_config(&data_path), &config.retry)?;
        if embedder.is_available() {
            tracing::info!("Embeddings available ({} dimensions)", embedder.dimensions());
        } else {
            tracing::warn!("No embedding provider configured; ingestion will fail");
        }
        let llm = create_llm_service(&load_llm_config(&data_path))?;

        Ok(Self {
            db,
            data_path,
            store,
            llm,
            embedder,
            config,
        })
    }

    /// A pipeline over this context's stores, with `config` overriding the
    /// loaded pipeline configuration.
    pub fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(
            self.llm.clone(),
            self.embedder.clone(),
            self.store.clone(),
            self.store.clone(),
            config,
        )
        .with_data_path(self.data_path.clone())
    }
}
