//! Pipeline configuration.
//!
//! Every threshold, window size, cache bound and retry knob lives here with a
//! default. Loaded from `{data_path}/pipeline.toml`, then the
//! `TALEFORGE_PIPELINE` env var (JSON), then defaults.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Load a config value with priority:
/// 1. `{data_path}/{file_name}` (TOML)
/// 2. `env_var` (JSON)
/// 3. `T::default()`
pub fn load_layered<T>(data_path: &Path, file_name: &str, env_var: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let config_path = data_path.join(file_name);
    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<T>(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    warn!(
                        "Failed to parse {}: {}. Using default.",
                        config_path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read {}: {}. Using default.",
                    config_path.display(),
                    e
                );
            }
        }
    }

    if let Ok(json) = std::env::var(env_var) {
        match serde_json::from_str::<T>(&json) {
            Ok(config) => {
                info!("Loaded config from {} env", env_var);
                return config;
            }
            Err(e) => {
                warn!("Failed to parse {}: {}. Using default.", env_var, e);
            }
        }
    }

    T::default()
}

/// Load the pipeline configuration for a data directory.
pub fn load_pipeline_config(data_path: &Path) -> PipelineConfig {
    load_layered(data_path, "pipeline.toml", "TALEFORGE_PIPELINE")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier: ClassifierConfig,
    pub identity: IdentityConfig,
    pub segmenter: SegmenterConfig,
    pub chronicle: ChronicleConfig,
    pub mechanics: MechanicsConfig,
    pub vibes: VibeConfig,
    pub arcs: ArcConfig,
    pub retry: RetryPolicy,
    /// Max episodes processed concurrently in the Micro-Pass.
    pub concurrency: usize,
    pub stages: StageToggles,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            identity: IdentityConfig::default(),
            segmenter: SegmenterConfig::default(),
            chronicle: ChronicleConfig::default(),
            mechanics: MechanicsConfig::default(),
            vibes: VibeConfig::default(),
            arcs: ArcConfig::default(),
            retry: RetryPolicy::default(),
            concurrency: 4,
            stages: StageToggles::default(),
        }
    }
}

/// Cheap-tier thresholds of the hybrid classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Top vector score needed to accept without the LLM.
    pub accept_threshold: f32,
    /// Required gap between best and second-best candidate.
    pub min_margin: f32,
    /// Below this top score the cheap tier conclusively answers "no match".
    pub reject_below: f32,
    pub top_k: usize,
    /// Stricter-prompt retries after a schema violation.
    pub schema_retries: u32,
    /// Upper bound on cached decisions per run.
    pub cache_capacity: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.88,
            min_margin: 0.05,
            reject_below: 0.45,
            top_k: 5,
            schema_retries: 1,
            cache_capacity: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Normalized Levenshtein similarity for alias fuzzy matches.
    pub fuzzy_ratio: f64,
    /// Stricter vector threshold used when the LLM cannot adjudicate.
    pub fallback_accept: f32,
    pub top_k: usize,
    /// Characters of surrounding context sent to the LLM.
    pub context_chars: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            fuzzy_ratio: 0.85,
            fallback_accept: 0.93,
            top_k: 5,
            context_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Sentences shown to the boundary detector per window.
    pub window_sentences: usize,
    /// Sentences shared between consecutive windows.
    pub overlap_sentences: usize,
    /// Vector score needed to bind a Location to a Topology Template.
    pub topology_threshold: f32,
    /// Name similarity for exact/fuzzy template promotion.
    pub template_fuzzy_ratio: f64,
    /// Cosine distance between adjacent sentences that marks a boundary
    /// when the LLM is unavailable.
    pub fallback_distance: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_sentences: 40,
            overlap_sentences: 4,
            topology_threshold: 0.75,
            template_fuzzy_ratio: 0.8,
            fallback_distance: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronicleConfig {
    /// Minimum similarity for a committed Event to be offered as a recall target.
    pub recall_threshold: f32,
    pub recall_top_k: usize,
    /// Similarity at which a narrated beat materializes a pending memory.
    pub memory_promotion_threshold: f32,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            recall_threshold: 0.70,
            recall_top_k: 3,
            memory_promotion_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanicsConfig {
    /// `None` keeps the cache unbounded for the process lifetime.
    pub cache_capacity: Option<u64>,
    /// Enables fuzzy cache hits on near-identical phrases.
    pub fuzzy_reuse_ratio: Option<f64>,
    pub accept_threshold: f32,
    pub reject_below: f32,
    pub top_k: usize,
    /// Phrases that are never mechanics.
    pub filler: Vec<String>,
    /// Phrases shorter than this are skipped.
    pub min_phrase_chars: usize,
}

impl Default for MechanicsConfig {
    fn default() -> Self {
        Self {
            cache_capacity: None,
            fuzzy_reuse_ratio: None,
            accept_threshold: 0.88,
            reject_below: 0.65,
            top_k: 3,
            filler: [
                "did", "do", "does", "be", "is", "was", "went", "go", "said", "say", "look",
                "looked", "saw", "walked", "walk", "nodded", "smiled", "sighed", "thought",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_phrase_chars: 3,
        }
    }
}

/// Read-time aggregation of a Location's Vibes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum VibeAggregationConfig {
    LatestWins,
    /// Exponential decay by narrative tick distance from the newest Vibe.
    DecayedBlend { half_life: f32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VibeConfig {
    pub aggregation: VibeAggregationConfig,
    /// Snippets shorter than this are ignored.
    pub min_snippet_chars: usize,
    /// Intensity delta below which the trend is Steady.
    pub trend_epsilon: f32,
}

impl Default for VibeConfig {
    fn default() -> Self {
        Self {
            aggregation: VibeAggregationConfig::LatestWins,
            min_snippet_chars: 5,
            trend_epsilon: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcConfig {
    /// Events per sliding window.
    pub window: usize,
    pub stride: usize,
    pub threshold: f32,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            window: 6,
            stride: 1,
            threshold: 0.65,
        }
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub detect_arcs: bool,
    pub normalize_stats: bool,
    /// Persist the identity registry snapshot after the run.
    pub snapshot_registry: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            detect_arcs: true,
            normalize_stats: true,
            snapshot_registry: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            concurrency = 8

            [classifier]
            accept_threshold = 0.9

            [vibes.aggregation]
            policy = "decayed_blend"
            half_life = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.classifier.accept_threshold, 0.9);
        assert_eq!(config.classifier.top_k, 5);
        assert_eq!(
            config.vibes.aggregation,
            VibeAggregationConfig::DecayedBlend { half_life: 3.0 }
        );
        assert!(config.stages.normalize_stats);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_layered::<PipelineConfig>(
            dir.path(),
            "pipeline.toml",
            "TALEFORGE_PIPELINE_TEST_UNSET",
        );
        assert_eq!(config.arcs.window, 6);
    }

    #[test]
    fn test_file_takes_priority() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("pipeline.toml"), "[arcs]\nwindow = 3\n").unwrap();
        let config = load_layered::<PipelineConfig>(
            dir.path(),
            "pipeline.toml",
            "TALEFORGE_PIPELINE_TEST_UNSET",
        );
        assert_eq!(config.arcs.window, 3);
    }
}
