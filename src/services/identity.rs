//! Identity Registry: the authoritative Molecule set of one document run.
//!
//! Resolution ladder: exact alias, then hybrid classification over the
//! nearest registered Molecules of a compatible kind (fuzzy alias hits are
//! always offered as candidates), then a new Molecule. Every resolution for
//! a name bucket runs under that bucket's lock, and minting re-checks the
//! alias table under the creation lock, so two concurrent calls never mint
//! two ids for one referent.
//!
//! Each later reference to a Molecule folds a projection of the mention and
//! its context into the Molecule's running stat mean.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rapidfuzz::distance::levenshtein;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{IdentityConfig, RetryPolicy};
use crate::embedding::EmbeddingService;
use crate::models::{
    Molecule, MoleculeId, MoleculeKind, ReviewStatus, StatSource, StatVector, TopologyRef,
};
use crate::registries::{EntityType, TopologyTemplate};
use crate::services::classifier::{Candidate, Classifier, ClassifyQuery, Selection};
use crate::services::projector::SemanticProjector;
use crate::services::report::{EntityFailure, ReviewItem};
use crate::services::writer::{CommitOutcome, GraphWriter, WorldEntity};
use crate::store::{Collection, PayloadFilter, VectorPoint};
use crate::utils::math::cosine_similarity;
use crate::utils::retry::with_backoff;
use crate::utils::text::{head_chars, is_generic_reference, normalize_name, strip_article};
use crate::TaleforgeError;

/// Outcome of `resolve`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub id: MoleculeId,
    pub name: String,
    pub is_new: bool,
    pub needs_review: bool,
}

/// Which rung of the ladder matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rung {
    Exact,
    Hybrid,
    Fallback,
}

pub struct IdentityRegistry {
    document_id: Option<String>,
    molecules: DashMap<MoleculeId, Molecule>,
    /// Article-stripped normalized alias -> ids (one per incompatible kind).
    aliases: DashMap<String, Vec<MoleculeId>>,
    embeddings: DashMap<MoleculeId, Vec<f32>>,
    buckets: DashMap<String, Arc<Mutex<()>>>,
    creation: Mutex<()>,
    classifier: Arc<Classifier>,
    projector: Arc<SemanticProjector>,
    writer: GraphWriter,
    config: IdentityConfig,
    review: Mutex<Vec<ReviewItem>>,
    failures: Mutex<Vec<EntityFailure>>,
}

/// Article-stripped name with inner punctuation folded to spaces, so
/// "The Cheshire-Cat" and "Cheshire Cat" share a key.
fn alias_key(name: &str) -> String {
    let folded: String = normalize_name(name)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    let folded = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    strip_article(&folded).to_string()
}

impl IdentityRegistry {
    pub fn new(
        classifier: Arc<Classifier>,
        projector: Arc<SemanticProjector>,
        writer: GraphWriter,
        config: IdentityConfig,
    ) -> Self {
        Self {
            document_id: None,
            molecules: DashMap::new(),
            aliases: DashMap::new(),
            embeddings: DashMap::new(),
            buckets: DashMap::new(),
            creation: Mutex::new(()),
            classifier,
            projector,
            writer,
            config,
            review: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Scope the registry to one document: minted Molecules are tagged with
    /// it and `hydrate` reloads its earlier Molecules.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Reload the Molecules an earlier run committed for this document so
    /// a re-run resolves to the same ids instead of minting duplicates.
    pub async fn hydrate(&self, retry: &RetryPolicy) -> Result<usize, TaleforgeError> {
        let Some(document_id) = self.document_id.as_deref() else {
            return Ok(0);
        };
        let vectors = self.writer.vector_store();
        let filter = PayloadFilter::eq("document_id", document_id);
        let points = with_backoff(retry, "load molecules", || {
            vectors.scroll(Collection::Molecules, Some(&filter))
        })
        .await?;

        let mut loaded = 0;
        for VectorPoint { id, vector, payload } in points {
            let molecule: Molecule = match serde_json::from_value(serde_json::Value::Object(payload)) {
                Ok(m) => m,
                Err(e) => {
                    warn!(point = %id, error = %e, "stored molecule unreadable, skipped");
                    continue;
                }
            };
            if self.molecules.contains_key(&molecule.id) {
                continue;
            }
            for alias in &molecule.aliases {
                let mut ids = self.aliases.entry(alias.clone()).or_default();
                if !ids.contains(&molecule.id) {
                    ids.push(molecule.id.clone());
                }
            }
            self.embeddings.insert(molecule.id.clone(), vector);
            self.molecules.insert(molecule.id.clone(), molecule);
            loaded += 1;
        }
        if loaded > 0 {
            info!(document = document_id, molecules = loaded, "restored molecules from an earlier run");
        }
        Ok(loaded)
    }

    fn embedder(&self) -> &Arc<dyn EmbeddingService> {
        self.projector.embedder()
    }

    /// `resolve(candidate_name, context) -> (MoleculeId, is_new)`.
    pub async fn resolve(
        &self,
        name: &str,
        kind: MoleculeKind,
        context: &str,
    ) -> Result<Resolution, TaleforgeError> {
        self.resolve_described(name, kind, None, context).await
    }

    /// Like `resolve`, with a description used when the Molecule is minted.
    pub async fn resolve_described(
        &self,
        name: &str,
        kind: MoleculeKind,
        description: Option<&str>,
        context: &str,
    ) -> Result<Resolution, TaleforgeError> {
        if is_generic_reference(name) {
            return Err(TaleforgeError::Validation(format!(
                "'{name}' is a generic reference, not an entity"
            )));
        }
        let key = alias_key(name);
        let bucket = self.buckets.entry(key.clone()).or_default().clone();
        let _guard = bucket.lock().await;

        if let Some(id) = self.exact(&key, kind) {
            return Ok(self.refer(id, &key, Rung::Exact, false, name, context).await);
        }

        let draft = Molecule {
            description: description.map(str::to_string),
            ..Molecule::new(name.trim(), kind)
        };
        let embedding = self.embedder().embed_text(&draft.semantic_text()).await?;

        let fuzzy = self.fuzzy(&key, kind);
        let candidates = self.nearest(&embedding, kind, &fuzzy);
        let mut thresholds = self.classifier.default_thresholds();
        if !fuzzy.is_empty() {
            // A spelling neighbour is always adjudicated, however far its vector.
            thresholds.reject_below = 0.0;
        }
        let mut needs_review = false;
        if !candidates.is_empty() {
            let query = ClassifyQuery::new("resolve_identity", name.trim(), candidates, thresholds)
            .with_context(head_chars(context, self.config.context_chars));
            let labeled = self.classifier.classify(&query).await;
            match labeled.value {
                Selection::Match { id, .. } => {
                    let id = MoleculeId::from(id);
                    return Ok(self.refer(id, &key, Rung::Hybrid, false, name, context).await);
                }
                Selection::NoMatch => {}
                Selection::Ambiguous { best, score } => match best {
                    Some(id) if score >= self.config.fallback_accept => {
                        warn!(name, score, "LLM unavailable, accepting strong vector match");
                        let id = MoleculeId::from(id);
                        return Ok(self.refer(id, &key, Rung::Fallback, false, name, context).await);
                    }
                    _ => needs_review = true,
                },
            }
        }

        let _creating = self.creation.lock().await;
        // Another bucket may have minted this referent meanwhile.
        if let Some(id) = self.exact(&key, kind) {
            return Ok(self.refer(id, &key, Rung::Exact, needs_review, name, context).await);
        }
        self.mint(draft, key, embedding, needs_review).await
    }

    fn exact(&self, key: &str, kind: MoleculeKind) -> Option<MoleculeId> {
        let ids = self.aliases.get(key)?;
        ids.iter()
            .find(|id| {
                self.molecules
                    .get(*id)
                    .is_some_and(|m| m.kind.is_compatible(kind))
            })
            .cloned()
    }

    /// Compatible Molecules with an alias within `fuzzy_ratio` of `key`.
    /// Spelling neighbours ("Sir John", "Sir Joan") may be distinct people,
    /// so these are candidates for adjudication, never matches.
    fn fuzzy(&self, key: &str, kind: MoleculeKind) -> Vec<MoleculeId> {
        let mut hits: Vec<MoleculeId> = Vec::new();
        for entry in self.aliases.iter() {
            let similarity = levenshtein::normalized_similarity(key.chars(), entry.key().chars());
            if similarity < self.config.fuzzy_ratio {
                continue;
            }
            for id in entry.value() {
                let compatible = self
                    .molecules
                    .get(id)
                    .is_some_and(|m| m.kind.is_compatible(kind));
                if compatible && !hits.contains(id) {
                    hits.push(id.clone());
                }
            }
        }
        hits
    }

    /// Top-k compatible Molecules by vector similarity, plus every fuzzy
    /// alias hit that did not make the cut.
    fn nearest(&self, embedding: &[f32], kind: MoleculeKind, fuzzy: &[MoleculeId]) -> Vec<Candidate> {
        let candidate = |id: &MoleculeId, vector: &[f32]| -> Option<Candidate> {
            let molecule = self.molecules.get(id)?;
            if !molecule.kind.is_compatible(kind) || vector.len() != embedding.len() {
                return None;
            }
            Some(Candidate::new(
                molecule.id.to_string(),
                molecule.semantic_text(),
                cosine_similarity(embedding, vector),
            ))
        };
        let mut scored: Vec<Candidate> = self
            .embeddings
            .iter()
            .filter_map(|entry| candidate(entry.key(), entry.value()))
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.config.top_k);
        for id in fuzzy {
            if scored.iter().any(|c| c.id == id.as_str()) {
                continue;
            }
            if let Some(c) = self
                .embeddings
                .get(id)
                .and_then(|vector| candidate(id, vector.value()))
            {
                scored.push(c);
            }
        }
        scored
    }

    /// Resolve to an existing Molecule and refine its stats from this mention.
    async fn refer(
        &self,
        id: MoleculeId,
        key: &str,
        rung: Rung,
        needs_review: bool,
        mention: &str,
        context: &str,
    ) -> Resolution {
        let resolution = self.matched(id, key, rung, needs_review);
        self.refine_from_mention(&resolution.id, mention, context).await;
        resolution
    }

    async fn refine_from_mention(&self, id: &MoleculeId, mention: &str, context: &str) {
        let Some(kind) = self.molecules.get(id).map(|m| m.kind) else {
            return;
        };
        let text = match head_chars(context, self.config.context_chars).trim() {
            "" => mention.trim().to_string(),
            context => format!("{}: {}", mention.trim(), context),
        };
        match self
            .projector
            .project_stats(&text, EntityType::Molecule(kind))
            .await
        {
            Ok(sample) => {
                self.refine_stats(id, sample);
            }
            Err(e) => debug!(molecule = %id, error = %e, "mention not projected"),
        }
    }

    fn matched(&self, id: MoleculeId, key: &str, rung: Rung, needs_review: bool) -> Resolution {
        let (name, grew) = match self.molecules.get_mut(&id) {
            Some(mut molecule) => (molecule.name.clone(), molecule.aliases.insert(key.to_string())),
            None => (key.to_string(), false),
        };
        if grew {
            let mut ids = self.aliases.entry(key.to_string()).or_default();
            if !ids.contains(&id) {
                ids.push(id.clone());
            }
        }
        debug!(alias = key, molecule = %id, ?rung, "resolved existing molecule");
        Resolution {
            id,
            name,
            is_new: false,
            needs_review,
        }
    }

    async fn mint(
        &self,
        mut molecule: Molecule,
        key: String,
        embedding: Vec<f32>,
        needs_review: bool,
    ) -> Result<Resolution, TaleforgeError> {
        molecule.aliases.insert(key.clone());
        molecule.document_id = self.document_id.clone();
        let full = normalize_name(&molecule.name);
        if full != key {
            molecule.aliases.insert(full.clone());
        }
        if needs_review {
            let reason = "identity could not be adjudicated; minted as new".to_string();
            molecule.status = ReviewStatus::NeedsReview {
                reason: reason.clone(),
            };
            self.review
                .lock()
                .await
                .push(ReviewItem::new(molecule.id.to_string(), reason));
        }
        match self
            .projector
            .project_embedding(&embedding, EntityType::Molecule(molecule.kind))
            .await
        {
            Ok(stats) => {
                molecule.stats = stats;
                molecule.stat_source = StatSource::Extracted;
                molecule.stat_samples = 1;
            }
            Err(e) => warn!(name = %molecule.name, error = %e, "stat projection skipped"),
        }

        let id = molecule.id.clone();
        self.molecules.insert(id.clone(), molecule.clone());
        self.embeddings.insert(id.clone(), embedding.clone());
        for alias in &molecule.aliases {
            self.aliases.entry(alias.clone()).or_default().push(id.clone());
        }
        info!(name = %molecule.name, kind = molecule.kind.as_str(), id = %id, "new molecule");

        let name = molecule.name.clone();
        self.commit(molecule, Some(embedding)).await;
        Ok(Resolution {
            id,
            name,
            is_new: true,
            needs_review,
        })
    }

    /// Commit through the writer. Failures are recorded and retried by the
    /// end-of-run sweep.
    async fn commit(&self, molecule: Molecule, vector: Option<Vec<f32>>) {
        let id = molecule.id.to_string();
        let outcome = self
            .writer
            .commit(WorldEntity::Molecule { molecule, vector })
            .await;
        let err = match outcome {
            Ok(CommitOutcome::Ack) => return,
            Ok(CommitOutcome::Retry(e)) | Err(e) => e,
        };
        warn!(molecule = %id, error = %err, "molecule commit failed");
        self.failures.lock().await.push(EntityFailure::new(id, &err));
    }

    /// Re-commit every Molecule with its final aliases and stats. Earlier
    /// commit failures are superseded by this attempt.
    pub async fn sweep(&self) -> Vec<EntityFailure> {
        self.failures.lock().await.clear();
        let mut failures = Vec::new();
        for molecule in self.molecules() {
            let vector = self.embeddings.get(&molecule.id).map(|v| v.clone());
            let id = molecule.id.to_string();
            match self
                .writer
                .commit(WorldEntity::Molecule { molecule, vector })
                .await
            {
                Ok(CommitOutcome::Ack) => {}
                Ok(CommitOutcome::Retry(e)) | Err(e) => {
                    warn!(molecule = %id, error = %e, "molecule sweep commit failed");
                    failures.push(EntityFailure::new(id, &e));
                }
            }
        }
        failures
    }

    /// Fold one projected sample into the Molecule's running mean.
    /// Extracted samples replace template-derived stats.
    pub fn refine_stats(&self, id: &MoleculeId, sample: StatVector) -> bool {
        let Some(mut molecule) = self.molecules.get_mut(id) else {
            return false;
        };
        let current = molecule.unnormalized_stats();
        molecule.raw_stats = None;
        if molecule.stat_source == StatSource::Extracted {
            let count = molecule.stat_samples;
            molecule.stats = current.running_mean(sample, count);
            molecule.stat_samples = count.saturating_add(1);
        } else {
            molecule.stats = sample;
            molecule.stat_samples = 1;
            molecule.stat_source = StatSource::Extracted;
        }
        true
    }

    /// Overwrite the un-normalized stats, e.g. with explicitly extracted values.
    pub fn set_stats(&self, id: &MoleculeId, stats: StatVector) -> bool {
        match self.molecules.get_mut(id) {
            Some(mut molecule) => {
                molecule.stats = stats;
                molecule.raw_stats = None;
                true
            }
            None => false,
        }
    }

    /// Normalization write-back: publish `normalized`, keep `raw` for the
    /// next rescale.
    pub fn apply_normalized(&self, id: &MoleculeId, raw: StatVector, normalized: StatVector) -> bool {
        match self.molecules.get_mut(id) {
            Some(mut molecule) => {
                molecule.stats = normalized;
                molecule.raw_stats = Some(raw);
                true
            }
            None => false,
        }
    }

    /// Bind a Location to a Topology Template. Inherits the template's
    /// properties; template stats apply only when nothing was extracted.
    pub fn promote_location(&self, id: &MoleculeId, template: &TopologyTemplate) -> bool {
        let Some(mut molecule) = self.molecules.get_mut(id) else {
            return false;
        };
        if molecule.kind != MoleculeKind::Location || !molecule.is_stub_location() {
            return false;
        }
        molecule.topology = Some(TopologyRef::Template {
            template_id: template.id.to_string(),
            name: template.name.to_string(),
        });
        molecule.properties = template.properties.iter().map(|p| p.to_string()).collect();
        if molecule.stat_source != StatSource::Extracted {
            molecule.stats = StatVector::from_array(template.profile);
            molecule.raw_stats = None;
            molecule.stat_source = StatSource::Template;
        }
        info!(location = %molecule.name, template = template.id, "location promoted");
        true
    }

    pub fn get(&self, id: &MoleculeId) -> Option<Molecule> {
        self.molecules.get(id).map(|m| m.clone())
    }

    pub fn embedding(&self, id: &MoleculeId) -> Option<Vec<f32>> {
        self.embeddings.get(id).map(|v| v.clone())
    }

    /// All Molecules, ordered by id.
    pub fn molecules(&self) -> Vec<Molecule> {
        let mut all: Vec<Molecule> = self.molecules.iter().map(|m| m.clone()).collect();
        all.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        all
    }

    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }

    pub async fn take_review_items(&self) -> Vec<ReviewItem> {
        std::mem::take(&mut *self.review.lock().await)
    }

    /// Default snapshot location for a document.
    pub fn snapshot_path(data_path: &Path, document_id: &str) -> PathBuf {
        data_path
            .join("registries")
            .join(format!("{document_id}.json"))
    }

    /// Persist the registry as JSON.
    pub fn snapshot(&self, path: &Path) -> Result<(), TaleforgeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.molecules())?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), molecules = self.len(), "registry snapshot written");
        Ok(())
    }
}
