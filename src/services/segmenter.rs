//! Segmenter: raw document -> ordered, gap-free Episodes.
//!
//! Sentences are shown to the boundary detector in overlapping numbered
//! windows. When a window's LLM call fails, adjacent-sentence embedding
//! distance decides its boundaries instead. Episode spans are unions of
//! sentence spans, so together they tile the document exactly.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SegmenterConfig;
use crate::embedding::EmbeddingService;
use crate::models::{CastMember, Episode, LocationRef, MoleculeKind, SceneType};
use crate::services::classifier::Classifier;
use crate::services::identity::IdentityRegistry;
use crate::services::topology::TopologyMatcher;
use crate::utils::math::cosine_similarity;
use crate::utils::text::{head_chars, split_sentences, Sentence, TextSpan};
use crate::TaleforgeError;

/// One proposed scene start.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BoundaryProposal {
    /// Number of the first sentence of the new scene.
    pub sentence: usize,
    pub scene_type: SceneType,
    /// Short title of the scene.
    pub label: String,
    /// Where the scene takes place, if stated.
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SegmentBatch {
    pub boundaries: Vec<BoundaryProposal>,
}

/// Entities present in a scene.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CastList {
    pub entities: Vec<CastEntry>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CastEntry {
    pub name: String,
    pub kind: MoleculeKind,
    #[serde(default)]
    pub description: Option<String>,
}

/// Half-open `(start, end)` sentence ranges of `size` with `overlap`
/// shared sentences; the last window ends at `count`.
pub fn sliding_windows(count: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(count);
        windows.push((start, end));
        if end == count {
            break;
        }
        start += step;
    }
    windows
}

pub struct Segmenter {
    classifier: Arc<Classifier>,
    embedder: Arc<dyn EmbeddingService>,
    identity: Arc<IdentityRegistry>,
    topology: Arc<TopologyMatcher>,
    config: SegmenterConfig,
    concurrency: usize,
}

impl Segmenter {
    pub fn new(
        classifier: Arc<Classifier>,
        embedder: Arc<dyn EmbeddingService>,
        identity: Arc<IdentityRegistry>,
        topology: Arc<TopologyMatcher>,
        config: SegmenterConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            classifier,
            embedder,
            identity,
            topology,
            config,
            concurrency: concurrency.max(1),
        }
    }

    /// `segment(raw_text)`: non-empty, text-ordered Episodes covering the
    /// whole input, each with a resolved Location and cast.
    pub async fn segment(&self, text: &str) -> Result<Vec<Episode>, TaleforgeError> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Err(TaleforgeError::DocumentFatal(
                "document contains no text".to_string(),
            ));
        }

        let boundaries = self.detect_boundaries(&sentences).await?;
        let mut episodes = self.build_episodes(text, &sentences, boundaries).await?;

        let casts: Vec<Vec<CastMember>> = futures::stream::iter(episodes.iter())
            .map(|episode| self.cast_pass(episode))
            .buffered(self.concurrency)
            .collect()
            .await;
        for (episode, cast) in episodes.iter_mut().zip(casts) {
            episode.cast = cast;
        }

        info!(
            episodes = episodes.len(),
            sentences = sentences.len(),
            "Segmentation complete"
        );
        Ok(episodes)
    }

    async fn detect_boundaries(
        &self,
        sentences: &[Sentence],
    ) -> Result<BTreeMap<usize, BoundaryProposal>, TaleforgeError> {
        let mut boundaries: BTreeMap<usize, BoundaryProposal> = BTreeMap::new();
        let windows = sliding_windows(
            sentences.len(),
            self.config.window_sentences,
            self.config.overlap_sentences,
        );
        let mut failed = 0;

        for (start, end) in &windows {
            let window = &sentences[*start..*end];
            let proposals = match self.llm_window(window).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(start, end, error = %e, "boundary detection failed, using embedding distance");
                    match self.fallback_window(window).await {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(start, end, error = %e, "fallback segmentation failed");
                            failed += 1;
                            continue;
                        }
                    }
                }
            };
            for proposal in proposals {
                if proposal.sentence < *start || proposal.sentence >= *end {
                    debug!(sentence = proposal.sentence, "boundary outside window ignored");
                    continue;
                }
                boundaries.entry(proposal.sentence).or_insert(proposal);
            }
        }

        if failed == windows.len() {
            return Err(TaleforgeError::DocumentFatal(
                "no window could be segmented".to_string(),
            ));
        }

        boundaries.entry(0).or_insert_with(|| BoundaryProposal {
            sentence: 0,
            scene_type: SceneType::Physical,
            label: head_chars(sentences[0].text.trim(), 48).to_string(),
            location: None,
        });
        Ok(boundaries)
    }

    async fn llm_window(&self, window: &[Sentence]) -> Result<Vec<BoundaryProposal>, TaleforgeError> {
        let mut prompt = String::from(
            "Split the numbered sentences into scenes. A new scene starts where the \
             location changes or the narrative breaks (time skip, memory, dream, quoted \
             document). For each scene start give the sentence number, scene_type \
             (physical, memory, dream, document), a short label and the location name \
             if stated.\n\n",
        );
        for s in window {
            prompt.push_str(&format!("[{}] {}\n", s.index, s.text.trim()));
        }
        let batch: SegmentBatch = self.classifier.extract("segment", prompt).await?;
        Ok(batch.boundaries)
    }

    /// Boundary wherever adjacent sentences are further apart than
    /// `fallback_distance`.
    async fn fallback_window(
        &self,
        window: &[Sentence],
    ) -> Result<Vec<BoundaryProposal>, TaleforgeError> {
        let texts: Vec<String> = window.iter().map(|s| s.text.trim().to_string()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let mut proposals = Vec::new();
        for (i, pair) in vectors.windows(2).enumerate() {
            let distance = 1.0 - cosine_similarity(&pair[0], &pair[1]);
            if distance > self.config.fallback_distance {
                let next = &window[i + 1];
                proposals.push(BoundaryProposal {
                    sentence: next.index,
                    scene_type: SceneType::Physical,
                    label: head_chars(next.text.trim(), 48).to_string(),
                    location: None,
                });
            }
        }
        Ok(proposals)
    }

    async fn build_episodes(
        &self,
        text: &str,
        sentences: &[Sentence],
        boundaries: BTreeMap<usize, BoundaryProposal>,
    ) -> Result<Vec<Episode>, TaleforgeError> {
        let starts: Vec<usize> = boundaries.keys().copied().collect();
        let mut episodes: Vec<Episode> = Vec::with_capacity(starts.len());

        for (index, proposal) in boundaries.into_values().enumerate() {
            let first = proposal.sentence;
            let last = starts
                .get(index + 1)
                .map(|next| next - 1)
                .unwrap_or(sentences.len() - 1);
            let span = TextSpan::new(sentences[first].span.start, sentences[last].span.end);
            let episode_text = span.slice(text).to_string();

            let location = self
                .resolve_location(&proposal, episodes.last(), &episode_text)
                .await?;
            episodes.push(Episode {
                index,
                span,
                text: episode_text,
                label: proposal.label,
                scene_type: proposal.scene_type,
                location,
                cast: Vec::new(),
            });
        }
        Ok(episodes)
    }

    /// Named location, else the previous episode's, else one named after
    /// the scene label.
    async fn resolve_location(
        &self,
        proposal: &BoundaryProposal,
        previous: Option<&Episode>,
        episode_text: &str,
    ) -> Result<LocationRef, TaleforgeError> {
        let named = proposal
            .location
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let resolution = match named {
            Some(name) => match self
                .identity
                .resolve(name, MoleculeKind::Location, episode_text)
                .await
            {
                Ok(r) => Some(r),
                Err(TaleforgeError::Validation(msg)) => {
                    debug!(name, msg, "location name rejected");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let resolution = match (resolution, previous) {
            (Some(r), _) => r,
            (None, Some(prev)) => return Ok(prev.location.clone()),
            (None, None) => {
                let label = proposal.label.trim();
                let name = if label.is_empty() { "Unnamed place" } else { label };
                match self
                    .identity
                    .resolve(name, MoleculeKind::Location, episode_text)
                    .await
                {
                    Err(TaleforgeError::Validation(_)) => {
                        self.identity
                            .resolve("Unnamed place", MoleculeKind::Location, episode_text)
                            .await?
                    }
                    other => other?,
                }
            }
        };

        if let Err(e) = self
            .topology
            .try_promote(&resolution.id, Some(head_chars(episode_text, 600)))
            .await
        {
            warn!(location = %resolution.name, error = %e, "topology matching failed");
        }
        let stub = self
            .identity
            .get(&resolution.id)
            .map_or(true, |m| m.is_stub_location());
        Ok(LocationRef {
            id: resolution.id,
            name: resolution.name,
            stub,
        })
    }

    /// Resolve the entities present in an episode. Failure leaves the cast
    /// empty; the chronicle pass still resolves participants by name.
    async fn cast_pass(&self, episode: &Episode) -> Vec<CastMember> {
        let prompt = format!(
            "List the named characters, groups, artifacts, commodities and places that \
             appear in this scene. kind is one of agent, group, artifact, commodity, \
             location, construct, lore. Skip pronouns and unnamed people.\n\n{}",
            episode.text
        );
        let list: CastList = match self.classifier.extract("cast", prompt).await {
            Ok(list) => list,
            Err(e) => {
                warn!(episode = episode.index, error = %e, "cast extraction failed");
                return Vec::new();
            }
        };

        let mut cast: Vec<CastMember> = Vec::new();
        for entry in list.entities {
            match self
                .identity
                .resolve_described(
                    &entry.name,
                    entry.kind,
                    entry.description.as_deref(),
                    &episode.text,
                )
                .await
            {
                Ok(r) => {
                    if !cast.iter().any(|c| c.id == r.id) {
                        cast.push(CastMember {
                            id: r.id,
                            name: r.name,
                        });
                    }
                }
                Err(e) => debug!(name = %entry.name, error = %e, "cast entry skipped"),
            }
        }
        cast
    }
}
