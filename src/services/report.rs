//! Per-entity failure and review records surfaced to the caller.

use serde::Serialize;

use crate::models::{ArcInstance, Atmosphere, Mood, SceneType, TextSpan};
use crate::services::normalizer::NormalizationOutcome;
use crate::TaleforgeError;

/// An entity the pipeline could not commit or classify. Never aborts the
/// document on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub kind: String,
    pub message: String,
}

impl EntityFailure {
    pub fn new(entity_id: impl Into<String>, error: &TaleforgeError) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// A decision taken by policy default that a human should confirm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub entity_id: String,
    pub reason: String,
}

impl ReviewItem {
    pub fn new(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }
}

/// Summary of one Episode as segmented.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub index: usize,
    pub label: String,
    pub scene_type: SceneType,
    pub span: TextSpan,
    pub location: String,
    pub location_stub: bool,
    pub cast: Vec<String>,
    pub events: usize,
    pub verbs: usize,
    pub vibes: usize,
    /// The Location's aggregated atmosphere once the run settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atmosphere: Option<AtmosphereSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtmosphereSummary {
    pub mood: Mood,
    pub intensity: f32,
    pub samples: usize,
}

impl From<Atmosphere> for AtmosphereSummary {
    fn from(atmosphere: Atmosphere) -> Self {
        Self {
            mood: atmosphere.mood,
            intensity: atmosphere.intensity,
            samples: atmosphere.samples,
        }
    }
}

/// Everything a pipeline run produced or failed to produce.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    pub episodes: Vec<EpisodeSummary>,
    pub molecules: usize,
    pub events: usize,
    pub detached_memories: usize,
    pub verbs: usize,
    pub vibes: usize,
    pub arcs: Vec<ArcInstance>,
    pub normalization: NormalizationOutcome,
    pub dangling_edges: usize,
    pub failures: Vec<EntityFailure>,
    pub needs_review: Vec<ReviewItem>,
    pub duration_ms: u128,
}

impl DocumentReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.dangling_edges == 0
    }
}
