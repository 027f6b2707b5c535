//! Semantic Projector: text -> four bounded stat axes.
//!
//! Each axis is a pair of anchor centroids (positive and negative). A text
//! embedding scores `(sim_pos - sim_neg) / 2 + 0.5` per axis, clamped, then
//! the static bias of the entity type is applied and the result clamped
//! again. Scores are locally comparable only; the normalizer fixes the
//! global scale.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::embedding::EmbeddingService;
use crate::models::{Axis, StatVector};
use crate::registries::EntityType;
use crate::utils::math::{centroid, clamp_unit, dot, vector_normalize};
use crate::TaleforgeError;

/// Anchor phrases per axis: (positive, negative).
const AXIS_ANCHORS: [(Axis, [&str; 6], [&str; 6]); 4] = [
    (
        Axis::Material,
        ["solid object", "heavy metal", "stone wall", "dense matter", "wealth", "infrastructure"],
        ["abstract thought", "ghost", "empty air", "illusion", "spiritual concept", "nothing"],
    ),
    (
        Axis::Vitality,
        ["thriving life", "strong health", "biological growth", "pulsing blood", "survival instinct", "nature"],
        ["dead corpse", "inanimate rock", "withered decay", "mechanical robot", "dust", "undead"],
    ),
    (
        Axis::Social,
        ["royal court", "political hierarchy", "crowded market", "organized guild", "diplomacy", "reputation"],
        ["lonely wilderness", "complete isolation", "hermit", "empty void", "antisocial", "outcast"],
    ),
    (
        Axis::Cognitive,
        ["complex magic spell", "scientific theory", "ancient library", "intellect", "strategic plan", "logic"],
        ["brute force", "simple instinct", "mindless chaos", "dull object", "random noise", "stupidity"],
    ),
];

/// Unit-length positive and negative centroids of one axis.
#[derive(Debug, Clone)]
struct AxisDirection {
    axis: Axis,
    positive: Vec<f32>,
    negative: Vec<f32>,
}

pub struct SemanticProjector {
    embedder: Arc<dyn EmbeddingService>,
    axes: OnceCell<Vec<AxisDirection>>,
}

impl SemanticProjector {
    pub fn new(embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            embedder,
            axes: OnceCell::new(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingService> {
        &self.embedder
    }

    /// Embed the anchors once per projector.
    async fn axes(&self) -> Result<&[AxisDirection], TaleforgeError> {
        let axes = self
            .axes
            .get_or_try_init(|| async {
                info!("Calibrating semantic axes");
                let mut axes = Vec::with_capacity(AXIS_ANCHORS.len());
                for (axis, positive, negative) in AXIS_ANCHORS {
                    let pos: Vec<String> = positive.iter().map(|s| s.to_string()).collect();
                    let neg: Vec<String> = negative.iter().map(|s| s.to_string()).collect();
                    let pos = self.embedder.embed_batch(&pos).await?;
                    let neg = self.embedder.embed_batch(&neg).await?;
                    let (Some(pos), Some(neg)) = (centroid(&pos), centroid(&neg)) else {
                        return Err(TaleforgeError::service(
                            "embedding",
                            format!("no anchor vectors for axis {}", axis.as_str()),
                        ));
                    };
                    axes.push(AxisDirection {
                        axis,
                        positive: vector_normalize(&pos),
                        negative: vector_normalize(&neg),
                    });
                }
                Ok::<_, TaleforgeError>(axes)
            })
            .await?;
        Ok(axes.as_slice())
    }

    /// Project an existing embedding. Skips the embedding call when the
    /// caller already holds the vector.
    pub async fn project_embedding(
        &self,
        embedding: &[f32],
        entity_type: EntityType,
    ) -> Result<StatVector, TaleforgeError> {
        let axes = self.axes().await?;
        let target = vector_normalize(embedding);
        let mut raw = StatVector::default();
        for direction in axes {
            if direction.positive.len() != target.len() {
                return Err(TaleforgeError::Validation(format!(
                    "embedding has {} dimensions, axes have {}",
                    target.len(),
                    direction.positive.len()
                )));
            }
            let score = (dot(&target, &direction.positive) - dot(&target, &direction.negative))
                / 2.0
                + 0.5;
            raw.set(direction.axis, clamp_unit(score));
        }
        Ok(raw.weighted(&entity_type.bias()))
    }

    /// `project_stats(text, entity_type)`: embed and project.
    pub async fn project_stats(
        &self,
        text: &str,
        entity_type: EntityType,
    ) -> Result<StatVector, TaleforgeError> {
        let embedding = self.embedder.embed_text(text).await?;
        self.project_embedding(&embedding, entity_type).await
    }
}
