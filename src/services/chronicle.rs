//! Chronicle Builder: beats -> the document's Event timeline.
//!
//! Appends to the `NEXT` chain are serialized by the chain lock and follow
//! narration order, flashbacks included. A flashback beat also carries a
//! `RECALLS` edge to the earlier Event it references; if none is committed,
//! a detached-memory Event is reserved under a fresh id and linked instead.
//! When a later narrated beat turns out to be that memory, it takes over the
//! placeholder id, so existing `RECALLS` edges stay valid.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ChronicleConfig;
use crate::models::{
    CausalTag, Episode, Event, EventArchetype, EventId, EventKind, MoleculeId, MoleculeKind,
    SceneType, StatVector,
};
use crate::registries::EntityType;
use crate::services::classifier::{Candidate, Classifier, ClassifyQuery, Selection, Thresholds};
use crate::services::identity::IdentityRegistry;
use crate::services::projector::SemanticProjector;
use crate::services::report::ReviewItem;
use crate::services::writer::{CommitOutcome, GraphWriter, WorldEntity};
use crate::store::{Collection, EdgeRecord, EdgeType, PayloadFilter};
use crate::utils::math::cosine_similarity;
use crate::utils::text::{find_span, head_chars, normalize_name, TextSpan};
use crate::TaleforgeError;

// ---------------------------------------------------------------------------
// Extraction schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BeatParticipant {
    pub name: String,
    #[serde(default = "default_participant_kind")]
    pub kind: MoleculeKind,
}

fn default_participant_kind() -> MoleculeKind {
    MoleculeKind::Agent
}

/// One narrative beat as extracted from an Episode.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Beat {
    pub title: String,
    pub description: String,
    /// Verbatim sentence of the source the beat is anchored on.
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub causal_tags: Vec<CausalTag>,
    #[serde(default = "default_archetype")]
    pub archetype: EventArchetype,
    #[serde(default)]
    pub participants: Vec<BeatParticipant>,
    /// True when the beat is a memory of, or reference to, an earlier event.
    #[serde(default)]
    pub flashback: bool,
    /// Short description of the earlier event being referenced.
    #[serde(default)]
    pub recalls: Option<String>,
}

fn default_archetype() -> EventArchetype {
    EventArchetype::Generic
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BeatList {
    pub beats: Vec<Beat>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// An Event ready for linking: participants resolved, stats projected.
#[derive(Debug, Clone)]
pub struct DraftEvent {
    pub event: Event,
    pub vector: Vec<f32>,
    /// Text of the referenced earlier event, for flashback beats.
    pub recall_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkOutcome {
    pub event_id: EventId,
    pub sequence: u64,
    /// Existing Event targeted by a `RECALLS` edge.
    pub recalls: Option<EventId>,
    /// Detached memory created for an unresolved reference.
    pub detached: Option<EventId>,
    /// The beat materialized a pending detached memory.
    pub promoted: bool,
    #[serde(skip)]
    pub review: Option<ReviewItem>,
}

struct ChainState {
    tail: Option<EventId>,
    next_sequence: u64,
}

struct PendingMemory {
    id: EventId,
    event: Event,
    vector: Vec<f32>,
}

pub struct ChronicleBuilder {
    document_id: String,
    classifier: Arc<Classifier>,
    projector: Arc<SemanticProjector>,
    identity: Arc<IdentityRegistry>,
    writer: GraphWriter,
    config: ChronicleConfig,
    chain: Mutex<ChainState>,
    pending: Mutex<Vec<PendingMemory>>,
}

impl ChronicleBuilder {
    pub fn new(
        document_id: impl Into<String>,
        classifier: Arc<Classifier>,
        projector: Arc<SemanticProjector>,
        identity: Arc<IdentityRegistry>,
        writer: GraphWriter,
        config: ChronicleConfig,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            classifier,
            projector,
            identity,
            writer,
            config,
            chain: Mutex::new(ChainState {
                tail: None,
                next_sequence: 0,
            }),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Beats of one Episode. Falls back to a single beat built from the
    /// episode label so the chain stays connected.
    pub async fn extract_beats(&self, episode: &Episode) -> (Vec<Beat>, bool) {
        let prompt = format!(
            "Break this scene into its chronological beats. For each beat give a title, a \
             one-sentence description, the verbatim quote it is based on, causal_tags \
             (direct, enable, motivate), an archetype (conflict_physical, conflict_social, \
             discovery, transition, creation, memory, generic) and the named participants. \
             Set flashback and describe the earlier event in recalls when the beat \
             remembers or refers back to something that happened before.\n\n\
             Scene type: {:?}\nScene: {}\n\n{}",
            episode.scene_type, episode.label, episode.text
        );
        match self.classifier.extract::<BeatList>("beats", prompt).await {
            Ok(list) if !list.beats.is_empty() => (list.beats, false),
            Ok(_) => (vec![self.fallback_beat(episode)], true),
            Err(e) => {
                warn!(episode = episode.index, error = %e, "beat extraction failed, using fallback beat");
                (vec![self.fallback_beat(episode)], true)
            }
        }
    }

    fn fallback_beat(&self, episode: &Episode) -> Beat {
        Beat {
            title: episode.label.clone(),
            description: head_chars(episode.text.trim(), 200).to_string(),
            quote: None,
            causal_tags: Vec::new(),
            archetype: EventArchetype::Generic,
            participants: Vec::new(),
            flashback: false,
            recalls: None,
        }
    }

    /// Turn a beat into an unlinked Event: resolve participants, anchor the
    /// span, embed and project stats. Safe to run concurrently.
    pub async fn draft_event(
        &self,
        beat: Beat,
        episode: &Episode,
        cursor: &mut usize,
    ) -> Result<DraftEvent, TaleforgeError> {
        let span = beat
            .quote
            .as_deref()
            .and_then(|q| find_span(&episode.text, q, *cursor))
            .map(|s| {
                *cursor = s.end;
                s.offset(episode.span.start)
            })
            .unwrap_or(episode.span);

        let mut participants: Vec<MoleculeId> = Vec::new();
        if beat.participants.is_empty() {
            participants.extend(episode.cast.iter().map(|c| c.id.clone()));
        }
        for p in &beat.participants {
            if let Some(id) = self.participant_id(p, episode).await {
                if !participants.contains(&id) {
                    participants.push(id);
                }
            }
        }

        let flashback = beat.flashback || episode.scene_type == SceneType::Memory;
        let recall_hint = if flashback {
            beat.recalls
                .clone()
                .filter(|r| !r.trim().is_empty())
                .or_else(|| Some(beat.description.clone()))
        } else {
            None
        };

        let mut event = Event {
            id: EventId::mint(),
            document_id: self.document_id.clone(),
            kind: EventKind::Narrated,
            sequence: None,
            title: beat.title,
            description: beat.description,
            span: Some(span),
            episode_index: Some(episode.index),
            flashback,
            causal_tags: beat.causal_tags,
            archetype: beat.archetype,
            participants,
            location: Some(episode.location.id.clone()),
            arcs: Default::default(),
            stats: StatVector::default(),
        };
        let vector = self
            .projector
            .embedder()
            .embed_text(&event.semantic_text())
            .await?;
        event.stats = self
            .projector
            .project_embedding(&vector, EntityType::Event(event.archetype))
            .await?;

        Ok(DraftEvent {
            event,
            vector,
            recall_hint,
        })
    }

    async fn participant_id(&self, p: &BeatParticipant, episode: &Episode) -> Option<MoleculeId> {
        let key = normalize_name(&p.name);
        if let Some(member) = episode
            .cast
            .iter()
            .find(|c| normalize_name(&c.name) == key)
        {
            return Some(member.id.clone());
        }
        match self.identity.resolve(&p.name, p.kind, &episode.text).await {
            Ok(r) => Some(r.id),
            Err(e) => {
                debug!(name = %p.name, error = %e, "participant skipped");
                None
            }
        }
    }

    /// `link_event(new_event, episode)`: append to the main chain, then
    /// resolve the flashback reference if there is one.
    pub async fn link_event(
        &self,
        draft: DraftEvent,
        episode: &Episode,
    ) -> Result<LinkOutcome, TaleforgeError> {
        let DraftEvent {
            mut event,
            vector,
            recall_hint,
        } = draft;

        let promoted = if event.flashback {
            false
        } else {
            self.adopt_pending_memory(&mut event, &vector).await
        };

        let sequence = self.append(&mut event, vector.clone()).await?;
        let mut outcome = LinkOutcome {
            event_id: event.id.clone(),
            sequence,
            recalls: None,
            detached: None,
            promoted,
            review: None,
        };

        if let Some(hint) = recall_hint {
            self.resolve_recall(&event, &hint, episode, &mut outcome)
                .await?;
        }
        Ok(outcome)
    }

    /// If `event` is similar enough to a pending detached memory, it takes
    /// over the memory's id.
    async fn adopt_pending_memory(&self, event: &mut Event, vector: &[f32]) -> bool {
        let mut pending = self.pending.lock().await;
        let best = pending
            .iter()
            .enumerate()
            .map(|(i, m)| (i, cosine_similarity(vector, &m.vector)))
            .filter(|(_, s)| *s >= self.config.memory_promotion_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let Some((index, score)) = best else {
            return false;
        };
        let memory = pending.remove(index);
        info!(memory = %memory.id, title = %event.title, score, "detached memory narrated, promoting in place");
        event.id = memory.id;
        event.arcs.extend(memory.event.arcs);
        true
    }

    async fn append(&self, event: &mut Event, vector: Vec<f32>) -> Result<u64, TaleforgeError> {
        let mut chain = self.chain.lock().await;
        let sequence = chain.next_sequence;
        event.kind = EventKind::Narrated;
        event.sequence = Some(sequence);

        match self
            .writer
            .commit(WorldEntity::Event {
                event: event.clone(),
                vector: Some(vector),
            })
            .await?
        {
            CommitOutcome::Ack => {}
            CommitOutcome::Retry(e) => return Err(e),
        }
        // The Event is stored: the chain moves on even if its NEXT edge fails.
        let previous = chain.tail.replace(event.id.clone());
        chain.next_sequence += 1;
        drop(chain);
        if let Some(tail) = previous {
            self.commit_edge(EdgeRecord::new(
                tail.as_str(),
                EdgeType::Next,
                event.id.as_str(),
            ))
            .await?;
        }
        debug!(event = %event.id, sequence, "event appended");
        Ok(sequence)
    }

    async fn commit_edge(&self, edge: EdgeRecord) -> Result<(), TaleforgeError> {
        match self.writer.commit(WorldEntity::Edge(edge)).await? {
            CommitOutcome::Ack => Ok(()),
            CommitOutcome::Retry(e) => Err(e),
        }
    }

    async fn resolve_recall(
        &self,
        event: &Event,
        hint: &str,
        episode: &Episode,
        outcome: &mut LinkOutcome,
    ) -> Result<(), TaleforgeError> {
        let embedder = self.projector.embedder();
        let hint_vector = embedder.embed_text(hint).await?;
        let hits = self
            .writer
            .vector_store()
            .search(
                Collection::Chronicle,
                &hint_vector,
                self.config.recall_top_k + 1,
                Some(&PayloadFilter::eq("document_id", self.document_id.clone())),
            )
            .await?;
        let candidates: Vec<Candidate> = hits
            .iter()
            .filter(|h| h.id != event.id.as_str() && h.score >= self.config.recall_threshold)
            .take(self.config.recall_top_k)
            .map(Candidate::from_scored)
            .collect();

        let mut needs_review = false;
        if !candidates.is_empty() {
            let base = self.classifier.default_thresholds();
            let query = ClassifyQuery::new(
                "resolve_recall",
                hint,
                candidates,
                Thresholds {
                    reject_below: self.config.recall_threshold,
                    ..base
                },
            )
            .with_context(head_chars(&episode.text, 2000));
            match self.classifier.classify(&query).await.value {
                Selection::Match { id, score } => {
                    let target = EventId::from(id);
                    debug!(from = %event.id, to = %target, score, "flashback resolved");
                    self.commit_edge(EdgeRecord::new(
                        event.id.as_str(),
                        EdgeType::Recalls,
                        target.as_str(),
                    ))
                    .await?;
                    outcome.recalls = Some(target);
                    return Ok(());
                }
                Selection::NoMatch => {}
                Selection::Ambiguous { .. } => needs_review = true,
            }
        }

        let memory = self.detach_memory(event, hint, hint_vector).await?;
        if needs_review {
            outcome.review = Some(ReviewItem::new(
                memory.as_str(),
                "recall target could not be adjudicated; detached memory created",
            ));
        }
        outcome.detached = Some(memory);
        Ok(())
    }

    /// Reserve a placeholder Event for an un-narrated memory and link it.
    async fn detach_memory(
        &self,
        from: &Event,
        hint: &str,
        vector: Vec<f32>,
    ) -> Result<EventId, TaleforgeError> {
        let stats = self
            .projector
            .project_embedding(&vector, EntityType::Event(EventArchetype::Memory))
            .await
            .unwrap_or_default();
        let memory = Event {
            id: EventId::mint(),
            document_id: self.document_id.clone(),
            kind: EventKind::DetachedMemory,
            sequence: None,
            title: head_chars(hint.trim(), 80).to_string(),
            description: hint.trim().to_string(),
            span: None,
            episode_index: None,
            flashback: false,
            causal_tags: Vec::new(),
            archetype: EventArchetype::Memory,
            participants: Vec::new(),
            location: None,
            arcs: Default::default(),
            stats,
        };
        let id = memory.id.clone();
        let violation = |message: String| TaleforgeError::ConsistencyViolation {
            entity_id: from.id.to_string(),
            message,
        };

        match self
            .writer
            .commit(WorldEntity::Event {
                event: memory.clone(),
                vector: Some(vector.clone()),
            })
            .await
        {
            Ok(CommitOutcome::Ack) => {}
            Ok(CommitOutcome::Retry(e)) | Err(e) => {
                return Err(violation(format!("detached memory could not be created: {e}")))
            }
        }
        self.commit_edge(EdgeRecord::new(
            from.id.as_str(),
            EdgeType::Recalls,
            id.as_str(),
        ))
        .await
        .map_err(|e| violation(format!("RECALLS edge failed: {e}")))?;

        info!(from = %from.id, memory = %id, "detached memory created");
        self.pending.lock().await.push(PendingMemory {
            id: id.clone(),
            event: memory,
            vector,
        });
        Ok(id)
    }

    /// Number of Events on the main chain so far.
    pub async fn chain_len(&self) -> u64 {
        self.chain.lock().await.next_sequence
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

/// Spans of an Episode's Events, for attaching Verbs to the Event they
/// happened in.
pub fn event_for_span(events: &[(EventId, TextSpan)], span: TextSpan) -> Option<EventId> {
    events
        .iter()
        .find(|(_, s)| s.start <= span.start && span.end <= s.end && !s.is_empty())
        .or_else(|| events.first())
        .map(|(id, _)| id.clone())
}
