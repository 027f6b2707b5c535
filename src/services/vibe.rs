//! Vibe Projector: atmospheric snippets attached to Locations.
//!
//! Every mention becomes its own Vibe; nothing is merged at write time.
//! Aggregation into an [`Atmosphere`] happens when a Location is read.

use std::sync::Arc;

use dashmap::DashMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::VibeConfig;
use crate::models::{
    aggregation_policy, Atmosphere, Episode, MoleculeId, Mood, Trend, Vibe, VibeAggregation, VibeId,
};
use crate::registries::EntityType;
use crate::services::classifier::Classifier;
use crate::services::projector::SemanticProjector;
use crate::services::report::EntityFailure;
use crate::services::topology::TopologyMatcher;
use crate::services::writer::{CommitOutcome, GraphWriter, WorldEntity};
use crate::store::{Collection, PayloadFilter, VectorStore};
use crate::utils::text::{find_span, TextSpan};
use crate::TaleforgeError;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct VibeSnippet {
    /// Verbatim atmospheric phrase or sentence.
    pub text: String,
    pub mood: Mood,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct VibeList {
    pub snippets: Vec<VibeSnippet>,
}

#[derive(Debug, Default)]
pub struct VibeOutcome {
    pub vibes: Vec<Vibe>,
    pub failures: Vec<EntityFailure>,
}

pub struct VibeProjector {
    classifier: Arc<Classifier>,
    projector: Arc<SemanticProjector>,
    topology: Arc<TopologyMatcher>,
    writer: GraphWriter,
    config: VibeConfig,
    /// (tick, intensity) per Location, for trends.
    history: DashMap<MoleculeId, Vec<(u64, f32)>>,
}

impl VibeProjector {
    pub fn new(
        classifier: Arc<Classifier>,
        projector: Arc<SemanticProjector>,
        topology: Arc<TopologyMatcher>,
        writer: GraphWriter,
        config: VibeConfig,
    ) -> Self {
        Self {
            classifier,
            projector,
            topology,
            writer,
            config,
            history: DashMap::new(),
        }
    }

    /// Extract and commit the atmosphere of one Episode at its Location.
    pub async fn extract_vibes(&self, episode: &Episode) -> VibeOutcome {
        let mut outcome = VibeOutcome::default();
        let prompt = format!(
            "Quote the phrases of this scene that describe its atmosphere: light, sound, \
             smell, weather, decay, menace, beauty. Give each verbatim with its dominant \
             mood (fear, tension, wonder, decay, neutral).\n\n{}",
            episode.text
        );
        let list: VibeList = match self.classifier.extract("vibes", prompt).await {
            Ok(list) => list,
            Err(e) => {
                warn!(episode = episode.index, error = %e, "vibe extraction failed");
                return outcome;
            }
        };

        let location = &episode.location.id;
        let mut cursor = 0;
        for snippet in list.snippets {
            let text = snippet.text.trim();
            if text.chars().count() < self.config.min_snippet_chars {
                continue;
            }
            let span = match find_span(&episode.text, text, cursor) {
                Some(s) => {
                    cursor = s.end;
                    s.offset(episode.span.start)
                }
                None => episode.span,
            };
            match self
                .project_vibe(span, text, snippet.mood, location, episode.index as u64)
                .await
            {
                Ok(vibe) => outcome.vibes.push(vibe),
                Err(e) => outcome
                    .failures
                    .push(EntityFailure::new(format!("vibe:{location}"), &e)),
            }
        }

        if episode.location.stub && !outcome.vibes.is_empty() {
            let evidence: Vec<&str> = outcome.vibes.iter().map(|v| v.text.as_str()).collect();
            if let Err(e) = self
                .topology
                .try_promote(location, Some(&evidence.join(" ")))
                .await
            {
                warn!(location = %location, error = %e, "stub re-promotion failed");
            }
        }
        outcome
    }

    /// `project_vibe(text_span, location)`: embed, score and attach.
    pub async fn project_vibe(
        &self,
        span: TextSpan,
        text: &str,
        mood: Mood,
        location: &MoleculeId,
        tick: u64,
    ) -> Result<Vibe, TaleforgeError> {
        let embedding = self.projector.embedder().embed_text(text).await?;
        let stats = self
            .projector
            .project_embedding(&embedding, EntityType::Vibe(mood))
            .await?;
        let intensity = stats.deviation_from_neutral();
        let trend = self.record_trend(location, tick, intensity);

        let vibe = Vibe {
            id: VibeId::mint(),
            location_id: location.clone(),
            text: text.to_string(),
            span,
            mood,
            embedding,
            intensity,
            trend,
            tick,
            stats,
        };
        match self.writer.commit(WorldEntity::Vibe(vibe.clone())).await? {
            CommitOutcome::Ack => {
                debug!(vibe = %vibe.id, location = %location, intensity, ?trend, "vibe attached");
                Ok(vibe)
            }
            CommitOutcome::Retry(e) => Err(e),
        }
    }

    /// Trend against the latest earlier-or-equal tick already recorded.
    fn record_trend(&self, location: &MoleculeId, tick: u64, intensity: f32) -> Trend {
        let mut history = self.history.entry(location.clone()).or_default();
        let previous = history
            .iter()
            .filter(|(t, _)| *t <= tick)
            .max_by_key(|(t, _)| *t)
            .map(|(_, i)| *i);
        history.push((tick, intensity));
        match previous {
            None => Trend::Steady,
            Some(prev) if intensity - prev > self.config.trend_epsilon => Trend::Rising,
            Some(prev) if prev - intensity > self.config.trend_epsilon => Trend::Falling,
            Some(_) => Trend::Steady,
        }
    }

    /// Current atmosphere of a Location under the configured policy.
    pub async fn atmosphere(&self, location: &MoleculeId) -> Result<Option<Atmosphere>, TaleforgeError> {
        let policy = aggregation_policy(self.config.aggregation);
        location_atmosphere(self.writer.vector_store().as_ref(), location, policy.as_ref()).await
    }
}

/// Read a Location's Vibes back from the vector store and aggregate them.
pub async fn location_atmosphere(
    vectors: &dyn VectorStore,
    location: &MoleculeId,
    policy: &dyn VibeAggregation,
) -> Result<Option<Atmosphere>, TaleforgeError> {
    let points = vectors
        .scroll(
            Collection::Vibes,
            Some(&PayloadFilter::eq("location_id", location.as_str())),
        )
        .await?;
    let mut vibes = Vec::with_capacity(points.len());
    for point in points {
        let mut payload = point.payload;
        payload.remove("doc_type");
        payload.insert("embedding".into(), json!(point.vector));
        vibes.push(serde_json::from_value::<Vibe>(serde_json::Value::Object(payload))?);
    }
    Ok(policy.aggregate(&vibes))
}
