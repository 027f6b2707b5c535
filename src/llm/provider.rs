//! LLM provider configuration and factory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::load_layered;
use crate::llm::{LlmService, NoopLlmService, OpenAiCompatibleLlm};
use crate::TaleforgeError;

/// LLM provider configuration. Loaded from `{data_path}/llm.toml` or the
/// `TALEFORGE_LLM` env var (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum LlmConfig {
    /// No LLM; every adjudication falls back to vector-only decisions.
    Disabled,
    OpenAiCompatible {
        /// Base URL, e.g. `https://api.openai.com/v1` or `http://localhost:11434/v1`
        endpoint: String,
        model: String,
        /// Env var holding the API key (default: `OPENAI_API_KEY`)
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        temperature: f32,
    },
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::Disabled
    }
}

pub fn load_llm_config(data_path: &Path) -> LlmConfig {
    load_layered(data_path, "llm.toml", "TALEFORGE_LLM")
}

/// Create an LLM service from provider configuration.
pub fn create_llm_service(config: &LlmConfig) -> Result<Arc<dyn LlmService>, TaleforgeError> {
    match config {
        LlmConfig::Disabled => {
            info!("LLM disabled; classification runs vector-only");
            Ok(Arc::new(NoopLlmService::new()))
        }
        LlmConfig::OpenAiCompatible {
            endpoint,
            model,
            api_key_env,
            timeout_secs,
            temperature,
        } => {
            let api_key = std::env::var(api_key_env).ok();
            info!("LLM: {} at {}", model, endpoint);
            Ok(Arc::new(OpenAiCompatibleLlm::new(
                endpoint.clone(),
                model.clone(),
                api_key,
                Duration::from_secs(*timeout_secs),
                *temperature,
            )?))
        }
    }
}
