//! The ingestion waterfall for one document.
//!
//! Macro-Pass (segmentation, cast, chronology) builds the skeleton
//! sequentially; the Micro-Pass extracts mechanics and atmosphere for all
//! Episodes concurrently. The writer barrier separates it from
//! post-processing (normalization, arcs).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingService;
use crate::llm::LlmService;
use crate::models::{Episode, EventId, TextSpan};
use crate::registries::index_registries;
use crate::services::arc::ArcDetector;
use crate::services::chronicle::{ChronicleBuilder, DraftEvent};
use crate::services::classifier::Classifier;
use crate::services::identity::IdentityRegistry;
use crate::services::mechanics::{MechanicExtractor, MechanicsCache, MechanicsOutcome};
use crate::services::normalizer::{NormalizationOutcome, StatNormalizer};
use crate::services::progress::{noop_progress, ProgressReporter};
use crate::services::projector::SemanticProjector;
use crate::services::report::{DocumentReport, EntityFailure, EpisodeSummary, ReviewItem};
use crate::services::segmenter::Segmenter;
use crate::services::topology::TopologyMatcher;
use crate::services::vibe::{VibeOutcome, VibeProjector};
use crate::services::writer::GraphWriter;
use crate::store::{GraphStore, VectorStore};
use crate::utils::sanitize::validate_identifier;
use crate::TaleforgeError;

const STEPS: usize = 6;

/// Long-lived pipeline: stores, services and the process-lifetime caches.
/// Per-document state (identity registry, chronicle) is built in `run`.
pub struct Pipeline {
    config: PipelineConfig,
    embedder: Arc<dyn EmbeddingService>,
    writer: GraphWriter,
    classifier: Arc<Classifier>,
    mechanics_cache: Arc<MechanicsCache>,
    progress: Arc<dyn ProgressReporter>,
    data_path: Option<PathBuf>,
}

/// Per-document components.
struct DocumentRun {
    identity: Arc<IdentityRegistry>,
    segmenter: Segmenter,
    chronicle: ChronicleBuilder,
    mechanics: MechanicExtractor,
    vibes: VibeProjector,
}

impl Pipeline {
    pub fn new(
        llm: Arc<dyn LlmService>,
        embedder: Arc<dyn EmbeddingService>,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        config: PipelineConfig,
    ) -> Self {
        let writer = GraphWriter::new(graph, vectors, config.retry.clone());
        let classifier = Arc::new(Classifier::new(
            llm,
            config.classifier.clone(),
            config.retry.clone(),
        ));
        let mechanics_cache = Arc::new(MechanicsCache::new(&config.mechanics));
        Self {
            config,
            embedder,
            writer,
            classifier,
            mechanics_cache,
            progress: noop_progress(),
            data_path: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Enables the registry snapshot under `{data_path}/registries/`.
    pub fn with_data_path(mut self, data_path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(data_path.into());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn writer(&self) -> &GraphWriter {
        &self.writer
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn mechanics_cache(&self) -> &Arc<MechanicsCache> {
        &self.mechanics_cache
    }

    /// Embed the static registries into `ontology_static` if they are stale.
    pub async fn index_registries(&self, force: bool) -> Result<usize, TaleforgeError> {
        index_registries(&self.writer, self.embedder.as_ref(), force).await
    }

    fn document_run(&self, document_id: &str) -> DocumentRun {
        let config = &self.config;
        let projector = Arc::new(SemanticProjector::new(self.embedder.clone()));
        let identity = Arc::new(
            IdentityRegistry::new(
                self.classifier.clone(),
                projector.clone(),
                self.writer.clone(),
                config.identity.clone(),
            )
            .with_document(document_id),
        );
        let topology = Arc::new(TopologyMatcher::new(
            identity.clone(),
            self.embedder.clone(),
            self.writer.vector_store(),
            config.segmenter.clone(),
        ));
        DocumentRun {
            segmenter: Segmenter::new(
                self.classifier.clone(),
                self.embedder.clone(),
                identity.clone(),
                topology.clone(),
                config.segmenter.clone(),
                config.concurrency,
            ),
            chronicle: ChronicleBuilder::new(
                document_id,
                self.classifier.clone(),
                projector.clone(),
                identity.clone(),
                self.writer.clone(),
                config.chronicle.clone(),
            ),
            mechanics: MechanicExtractor::new(
                self.classifier.clone(),
                projector.clone(),
                identity.clone(),
                self.writer.clone(),
                self.mechanics_cache.clone(),
                config.mechanics.clone(),
            ),
            vibes: VibeProjector::new(
                self.classifier.clone(),
                projector,
                topology,
                self.writer.clone(),
                config.vibes.clone(),
            ),
            identity,
        }
    }

    /// Run the full waterfall on one complete document.
    ///
    /// Only a failure to build the skeleton (`DocumentFatal`), an invalid
    /// document id, an unreachable registry index or an unreadable store of
    /// earlier Molecules abort the run; all other problems land in the report.
    ///
    /// Re-running a document reuses the Molecules its earlier runs committed.
    pub async fn run(&self, document_id: &str, text: &str) -> Result<DocumentReport, TaleforgeError> {
        validate_identifier(document_id)?;
        let started = Instant::now();
        let concurrency = self.config.concurrency.max(1);
        self.classifier.invalidate();
        self.index_registries(false).await?;

        let doc = self.document_run(document_id);
        doc.identity.hydrate(&self.config.retry).await?;
        let mut failures: Vec<EntityFailure> = Vec::new();
        let mut review: Vec<ReviewItem> = Vec::new();

        // ------------------------------------------------------------------
        // Macro-Pass
        // ------------------------------------------------------------------
        self.progress.step(0, STEPS, "Segmenting").await;
        let episodes = doc.segmenter.segment(text).await?;

        self.progress.step(1, STEPS, "Building chronology").await;
        let drafts: Vec<Vec<Result<DraftEvent, TaleforgeError>>> =
            futures::stream::iter(episodes.iter())
                .map(|episode| draft_episode(&doc.chronicle, episode))
                .buffered(concurrency)
                .collect()
                .await;

        let mut episode_events: Vec<Vec<(EventId, TextSpan)>> = vec![Vec::new(); episodes.len()];
        let mut detached = 0;
        for (episode, drafts) in episodes.iter().zip(drafts) {
            for (n, draft) in drafts.into_iter().enumerate() {
                let draft = match draft {
                    Ok(d) => d,
                    Err(e) => {
                        failures.push(EntityFailure::new(format!("beat:{}:{n}", episode.index), &e));
                        continue;
                    }
                };
                let span = draft.event.span.unwrap_or(episode.span);
                match doc.chronicle.link_event(draft, episode).await {
                    Ok(outcome) => {
                        if outcome.detached.is_some() {
                            detached += 1;
                        }
                        review.extend(outcome.review);
                        episode_events[episode.index].push((outcome.event_id, span));
                    }
                    Err(e) => {
                        warn!(episode = episode.index, error = %e, "event not linked");
                        failures.push(EntityFailure::new(format!("beat:{}:{n}", episode.index), &e));
                    }
                }
            }
        }
        let events = doc.chronicle.chain_len().await as usize;
        info!(
            document = document_id,
            episodes = episodes.len(),
            events,
            detached,
            "Macro-Pass complete"
        );

        // ------------------------------------------------------------------
        // Micro-Pass
        // ------------------------------------------------------------------
        self.progress.step(2, STEPS, "Extracting mechanics and atmosphere").await;
        let mut micro: Vec<(usize, MechanicsOutcome, VibeOutcome)> =
            futures::stream::iter(episodes.iter().zip(episode_events.iter()))
                .map(|(episode, events)| {
                    let doc = &doc;
                    async move {
                        let mechanics = doc.mechanics.extract_mechanics(episode, events).await;
                        let vibes = doc.vibes.extract_vibes(episode).await;
                        (episode.index, mechanics, vibes)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        micro.sort_by_key(|(index, _, _)| *index);

        // ------------------------------------------------------------------
        // Barrier
        // ------------------------------------------------------------------
        self.progress.step(3, STEPS, "Settling commits").await;
        failures.extend(doc.identity.sweep().await);
        let settle = self.writer.settle().await?;
        failures.extend(settle.failures);
        info!(
            flushed = settle.flushed_edges,
            dangling = settle.dangling.len(),
            "Writer barrier reached"
        );

        // ------------------------------------------------------------------
        // Post-processing
        // ------------------------------------------------------------------
        self.progress.step(4, STEPS, "Post-processing").await;
        let normalization = if self.config.stages.normalize_stats {
            match StatNormalizer::new(&doc.identity, &self.writer)
                .normalize(document_id)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    failures.push(EntityFailure::new(
                        crate::services::normalizer::marker_id(document_id),
                        &e,
                    ));
                    NormalizationOutcome::Skipped
                }
            }
        } else {
            NormalizationOutcome::Skipped
        };

        let mut arcs = Vec::new();
        if self.config.stages.detect_arcs {
            let detector = ArcDetector::new(&self.writer, self.embedder.as_ref(), &self.config.arcs);
            match detector.detect_arcs(document_id).await {
                Ok(report) => {
                    failures.extend(report.failures);
                    arcs = report.arcs;
                }
                Err(e) => failures.push(EntityFailure::new(format!("arcs:{document_id}"), &e)),
            }
        }

        self.progress.step(5, STEPS, "Writing registry snapshot").await;
        if let (true, Some(data_path)) = (self.config.stages.snapshot_registry, &self.data_path) {
            let path = IdentityRegistry::snapshot_path(data_path, document_id);
            if let Err(e) = doc.identity.snapshot(&path) {
                warn!(error = %e, "registry snapshot failed");
                failures.push(EntityFailure::new(format!("snapshot:{document_id}"), &e));
            }
        }
        review.extend(doc.identity.take_review_items().await);
        self.progress.step(STEPS, STEPS, "Done").await;

        // ------------------------------------------------------------------
        // Report
        // ------------------------------------------------------------------
        let mut verbs = 0;
        let mut vibes = 0;
        let mut summaries = Vec::with_capacity(episodes.len());
        for (episode, (_, mechanics, vibe_outcome)) in episodes.iter().zip(micro) {
            verbs += mechanics.verbs.len();
            vibes += vibe_outcome.vibes.len();
            failures.extend(mechanics.failures);
            failures.extend(vibe_outcome.failures);
            review.extend(mechanics.review);
            let mut summary = summarize(
                episode,
                &doc.identity,
                episode_events[episode.index].len(),
                mechanics.verbs.len(),
                vibe_outcome.vibes.len(),
            );
            match doc.vibes.atmosphere(&episode.location.id).await {
                Ok(atmosphere) => summary.atmosphere = atmosphere.map(Into::into),
                Err(e) => warn!(episode = episode.index, error = %e, "atmosphere not read"),
            }
            summaries.push(summary);
        }

        let report = DocumentReport {
            document_id: document_id.to_string(),
            episodes: summaries,
            molecules: doc.identity.len(),
            events,
            detached_memories: detached,
            verbs,
            vibes,
            arcs,
            normalization,
            dangling_edges: settle.dangling.len(),
            failures,
            needs_review: review,
            duration_ms: started.elapsed().as_millis(),
        };
        info!(
            document = document_id,
            molecules = report.molecules,
            events = report.events,
            verbs = report.verbs,
            vibes = report.vibes,
            failures = report.failures.len(),
            "Document processed"
        );
        Ok(report)
    }
}

/// Extract beats and draft every Event of one Episode, in beat order.
async fn draft_episode(
    chronicle: &ChronicleBuilder,
    episode: &Episode,
) -> Vec<Result<DraftEvent, TaleforgeError>> {
    let (beats, fallback) = chronicle.extract_beats(episode).await;
    if fallback {
        warn!(episode = episode.index, "fallback beat used");
    }
    let mut cursor = 0;
    let mut drafts = Vec::with_capacity(beats.len());
    for beat in beats {
        drafts.push(chronicle.draft_event(beat, episode, &mut cursor).await);
    }
    drafts
}

fn summarize(
    episode: &Episode,
    identity: &IdentityRegistry,
    events: usize,
    verbs: usize,
    vibes: usize,
) -> EpisodeSummary {
    let location_stub = identity
        .get(&episode.location.id)
        .map_or(episode.location.stub, |m| m.is_stub_location());
    EpisodeSummary {
        index: episode.index,
        label: episode.label.clone(),
        scene_type: episode.scene_type,
        span: episode.span,
        location: episode.location.name.clone(),
        location_stub,
        cast: episode.cast.iter().map(|c| c.name.clone()).collect(),
        events,
        verbs,
        vibes,
        atmosphere: None,
    }
}
