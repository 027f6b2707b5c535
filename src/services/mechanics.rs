//! Mechanic Extractor: action phrases -> Verbs bound to Game Primitives.
//!
//! Phrases pass a filler stoplist, then the phrase cache, and only cache
//! misses reach the classifier. The cache remembers "not a mechanic" too.

use std::sync::Arc;

use moka::future::Cache;
use rapidfuzz::distance::levenshtein;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MechanicsConfig;
use crate::models::{Episode, EventId, MoleculeId, MoleculeKind, Verb, VerbId};
use crate::registries::{doc_type, find_primitive, EntityType};
use crate::services::chronicle::event_for_span;
use crate::services::classifier::{Candidate, Classifier, ClassifyQuery, Selection, Thresholds};
use crate::services::identity::IdentityRegistry;
use crate::services::projector::SemanticProjector;
use crate::services::report::{EntityFailure, ReviewItem};
use crate::services::writer::{CommitOutcome, GraphWriter, WorldEntity};
use crate::store::{Collection, PayloadFilter};
use crate::utils::text::{find_span, normalize_phrase, TextSpan};
use crate::TaleforgeError;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ActionMention {
    /// The verb phrase as written ("slashed at").
    pub phrase: String,
    /// Name of whoever performs the action.
    pub actor: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub target_kind: Option<MoleculeKind>,
    /// Verbatim sentence containing the action.
    #[serde(default)]
    pub quote: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ActionList {
    pub actions: Vec<ActionMention>,
}

/// Cached classification of a normalized phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MechanicVerdict {
    Primitive(String),
    NotMechanic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    Exact,
    Fuzzy,
}

/// Process-lifetime phrase cache. Advisory: a stale "not a mechanic" is
/// an accepted false negative.
pub struct MechanicsCache {
    entries: Cache<String, MechanicVerdict>,
    fuzzy_ratio: Option<f64>,
}

impl MechanicsCache {
    pub fn new(config: &MechanicsConfig) -> Self {
        let builder = Cache::builder();
        let entries = match config.cache_capacity {
            Some(capacity) => builder.max_capacity(capacity).build(),
            None => builder.build(),
        };
        Self {
            entries,
            fuzzy_ratio: config.fuzzy_reuse_ratio,
        }
    }

    pub async fn lookup(&self, key: &str) -> Option<(MechanicVerdict, CacheHit)> {
        if let Some(verdict) = self.entries.get(key).await {
            return Some((verdict, CacheHit::Exact));
        }
        let ratio = self.fuzzy_ratio?;
        self.entries
            .iter()
            .map(|(phrase, verdict)| {
                let similarity =
                    levenshtein::normalized_similarity(key.chars(), phrase.chars());
                (similarity, verdict)
            })
            .filter(|(similarity, _)| *similarity >= ratio)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, verdict)| (verdict, CacheHit::Fuzzy))
    }

    pub async fn record(&self, key: String, verdict: MechanicVerdict) {
        self.entries.insert(key, verdict).await;
    }

    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Verbs of one Episode plus whatever could not be committed.
#[derive(Debug, Default)]
pub struct MechanicsOutcome {
    pub verbs: Vec<Verb>,
    pub failures: Vec<EntityFailure>,
    pub review: Vec<ReviewItem>,
    /// Phrases decided without the classifier.
    pub cache_hits: usize,
}

pub struct MechanicExtractor {
    classifier: Arc<Classifier>,
    projector: Arc<SemanticProjector>,
    identity: Arc<IdentityRegistry>,
    writer: GraphWriter,
    cache: Arc<MechanicsCache>,
    config: MechanicsConfig,
}

impl MechanicExtractor {
    pub fn new(
        classifier: Arc<Classifier>,
        projector: Arc<SemanticProjector>,
        identity: Arc<IdentityRegistry>,
        writer: GraphWriter,
        cache: Arc<MechanicsCache>,
        config: MechanicsConfig,
    ) -> Self {
        Self {
            classifier,
            projector,
            identity,
            writer,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<MechanicsCache> {
        &self.cache
    }

    fn is_filler(&self, key: &str) -> bool {
        if key.chars().count() < self.config.min_phrase_chars {
            return true;
        }
        let head = key.split_whitespace().next().unwrap_or(key);
        self.config.filler.iter().any(|f| f == key || f == head)
    }

    /// `extract_mechanics(episode)`. `events` are the Episode's Events with
    /// their spans; each Verb attaches to the one containing it.
    pub async fn extract_mechanics(
        &self,
        episode: &Episode,
        events: &[(EventId, TextSpan)],
    ) -> MechanicsOutcome {
        let mut outcome = MechanicsOutcome::default();
        let prompt = format!(
            "List the concrete actions in this scene that a game could model as a \
             mechanic (fighting, sneaking, persuading, casting, crafting, climbing...). \
             For each give the verb phrase as written, the actor's name, the target's \
             name and kind if any, and the verbatim sentence it occurs in. Skip \
             speech tags and idle movement.\n\n{}",
            episode.text
        );
        let list: ActionList = match self.classifier.extract("actions", prompt).await {
            Ok(list) => list,
            Err(e) => {
                warn!(episode = episode.index, error = %e, "action extraction failed");
                return outcome;
            }
        };

        let mut cursor = 0;
        for mention in list.actions {
            let key = normalize_phrase(&mention.phrase);
            if self.is_filler(&key) {
                debug!(phrase = %key, "filler skipped");
                continue;
            }

            let primitive_id = match self.cache.lookup(&key).await {
                Some((verdict, hit)) => {
                    debug!(phrase = %key, ?hit, ?verdict, "mechanics cache hit");
                    outcome.cache_hits += 1;
                    match verdict {
                        MechanicVerdict::Primitive(id) => id,
                        MechanicVerdict::NotMechanic => continue,
                    }
                }
                None => match self.classify_phrase(&key, &mention, episode).await {
                    Ok(Some(id)) => id,
                    Ok(None) => continue,
                    Err(review) => {
                        outcome.review.push(review);
                        continue;
                    }
                },
            };

            match self
                .build_verb(&mention, &primitive_id, episode, events, &mut cursor)
                .await
            {
                Ok(Some(verb)) => match self.writer.commit(WorldEntity::Verb(verb.clone())).await {
                    Ok(CommitOutcome::Ack) => outcome.verbs.push(verb),
                    Ok(CommitOutcome::Retry(e)) | Err(e) => {
                        outcome.failures.push(EntityFailure::new(verb.id.as_str(), &e))
                    }
                },
                Ok(None) => {}
                Err(e) => outcome
                    .failures
                    .push(EntityFailure::new(format!("verb:{key}"), &e)),
            }
        }

        if !outcome.verbs.is_empty() {
            info!(
                episode = episode.index,
                verbs = outcome.verbs.len(),
                cache_hits = outcome.cache_hits,
                "Mechanics extracted"
            );
        }
        outcome
    }

    /// Classify a cache miss against the primitive registry and cache the
    /// decision. Ambiguous results are not cached.
    async fn classify_phrase(
        &self,
        key: &str,
        mention: &ActionMention,
        episode: &Episode,
    ) -> Result<Option<String>, ReviewItem> {
        let review = |reason: String| ReviewItem::new(format!("verb:{key}"), reason);
        let text = match &mention.target {
            Some(target) => format!("{} {} {}", mention.actor, mention.phrase, target),
            None => format!("{} {}", mention.actor, mention.phrase),
        };
        let embedding = self
            .projector
            .embedder()
            .embed_text(&text)
            .await
            .map_err(|e| review(format!("embedding failed: {e}")))?;
        let hits = self
            .writer
            .vector_store()
            .search(
                Collection::OntologyStatic,
                &embedding,
                self.config.top_k,
                Some(&PayloadFilter::eq("doc_type", doc_type::PRIMITIVE)),
            )
            .await
            .map_err(|e| review(format!("primitive search failed: {e}")))?;

        let candidates: Vec<Candidate> = hits.iter().map(Candidate::from_scored).collect();
        let thresholds = Thresholds {
            accept: self.config.accept_threshold,
            min_margin: self.classifier.config().min_margin,
            reject_below: self.config.reject_below,
        };
        let context = mention.quote.clone().unwrap_or_else(|| episode.label.clone());
        let query =
            ClassifyQuery::new("classify_mechanic", text, candidates, thresholds).with_context(context);

        let labeled = self.classifier.classify(&query).await;
        let verdict = match labeled.value {
            Selection::Match { id, .. } => MechanicVerdict::Primitive(id),
            Selection::NoMatch => MechanicVerdict::NotMechanic,
            Selection::Ambiguous { best, .. } => {
                warn!(phrase = %key, ?best, "mechanic classification ambiguous, treated as no mechanic");
                return Err(review(
                    "mechanic could not be classified; treated as no mechanic".to_string(),
                ));
            }
        };
        self.cache.record(key.to_string(), verdict.clone()).await;
        Ok(match verdict {
            MechanicVerdict::Primitive(id) => Some(id),
            MechanicVerdict::NotMechanic => None,
        })
    }

    async fn build_verb(
        &self,
        mention: &ActionMention,
        primitive_id: &str,
        episode: &Episode,
        events: &[(EventId, TextSpan)],
        cursor: &mut usize,
    ) -> Result<Option<Verb>, TaleforgeError> {
        let Some(primitive) = find_primitive(primitive_id) else {
            return Err(TaleforgeError::Validation(format!(
                "unknown primitive '{primitive_id}'"
            )));
        };
        let actor = match self.participant(&mention.actor, MoleculeKind::Agent, episode).await? {
            Some(id) => id,
            None => {
                debug!(phrase = %mention.phrase, actor = %mention.actor, "verb without a nameable actor skipped");
                return Ok(None);
            }
        };
        let target = match &mention.target {
            Some(name) => {
                let kind = mention.target_kind.unwrap_or(MoleculeKind::Agent);
                self.participant(name, kind, episode).await?
            }
            None => None,
        };

        let anchor = mention.quote.as_deref().unwrap_or(&mention.phrase);
        let local = find_span(&episode.text, anchor, *cursor)
            .or_else(|| find_span(&episode.text, &mention.phrase, 0));
        let span = match local {
            Some(s) => {
                *cursor = s.start;
                s.offset(episode.span.start)
            }
            None => episode.span,
        };

        let stats = self
            .projector
            .project_stats(&mention.phrase, EntityType::Action(primitive.system))
            .await?;

        Ok(Some(Verb {
            id: VerbId::mint(),
            primitive_id: primitive.id.to_string(),
            phrase: mention.phrase.trim().to_string(),
            span,
            actor,
            target,
            episode_index: episode.index,
            event_id: event_for_span(events, span),
            stats,
        }))
    }

    async fn participant(
        &self,
        name: &str,
        kind: MoleculeKind,
        episode: &Episode,
    ) -> Result<Option<MoleculeId>, TaleforgeError> {
        match self.identity.resolve(name, kind, &episode.text).await {
            Ok(r) => Ok(Some(r.id)),
            Err(TaleforgeError::Validation(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
