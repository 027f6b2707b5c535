//! Stub Location promotion against the Topology Template registry.

use std::sync::Arc;

use rapidfuzz::distance::levenshtein;
use tracing::debug;

use crate::config::SegmenterConfig;
use crate::embedding::EmbeddingService;
use crate::models::MoleculeId;
use crate::registries::{doc_type, find_template, TopologyTemplate, TOPOLOGY_TEMPLATES};
use crate::services::identity::IdentityRegistry;
use crate::store::{Collection, PayloadFilter, VectorStore};
use crate::utils::text::normalize_name;
use crate::TaleforgeError;

pub struct TopologyMatcher {
    identity: Arc<IdentityRegistry>,
    embedder: Arc<dyn EmbeddingService>,
    vectors: Arc<dyn VectorStore>,
    config: SegmenterConfig,
}

/// Exact or fuzzy name match against template names and synonyms.
pub fn lexical_match(name: &str, fuzzy_ratio: f64) -> Option<&'static TopologyTemplate> {
    let name = normalize_name(name);
    if name.is_empty() {
        return None;
    }
    let words: Vec<&str> = name.split_whitespace().collect();

    let mut best: Option<(f64, &'static TopologyTemplate)> = None;
    for template in TOPOLOGY_TEMPLATES {
        let template_name = template.name.to_lowercase();
        let synonym_hit = template.synonyms.iter().any(|s| {
            if s.contains(' ') {
                name.contains(*s)
            } else {
                words.contains(s)
            }
        });
        if name == template_name || synonym_hit {
            return Some(template);
        }
        for word in &words {
            for synonym in template.synonyms {
                let similarity = levenshtein::normalized_similarity(word.chars(), synonym.chars());
                if similarity >= fuzzy_ratio && best.map_or(true, |(s, _)| similarity > s) {
                    best = Some((similarity, template));
                }
            }
        }
        let similarity = levenshtein::normalized_similarity(name.chars(), template_name.chars());
        if similarity >= fuzzy_ratio && best.map_or(true, |(s, _)| similarity > s) {
            best = Some((similarity, template));
        }
    }
    best.map(|(_, t)| t)
}

impl TopologyMatcher {
    pub fn new(
        identity: Arc<IdentityRegistry>,
        embedder: Arc<dyn EmbeddingService>,
        vectors: Arc<dyn VectorStore>,
        config: SegmenterConfig,
    ) -> Self {
        Self {
            identity,
            embedder,
            vectors,
            config,
        }
    }

    /// Try to bind a stub Location. `evidence` is descriptive prose (episode
    /// text) used for the vector match when the name alone does not match.
    /// Returns the bound template, or `None` if the Location stays a stub.
    pub async fn try_promote(
        &self,
        location: &MoleculeId,
        evidence: Option<&str>,
    ) -> Result<Option<&'static TopologyTemplate>, TaleforgeError> {
        let Some(molecule) = self.identity.get(location) else {
            return Ok(None);
        };
        if !molecule.is_stub_location() {
            return Ok(None);
        }

        let by_name = std::iter::once(molecule.name.as_str())
            .chain(molecule.aliases.iter().map(String::as_str))
            .find_map(|n| lexical_match(n, self.config.template_fuzzy_ratio));
        if let Some(template) = by_name {
            self.identity.promote_location(location, template);
            return Ok(Some(template));
        }

        let text = match evidence {
            Some(e) if !e.trim().is_empty() => format!("{}: {}", molecule.name, e),
            _ => molecule.name.clone(),
        };
        let embedding = self.embedder.embed_text(&text).await?;
        let hits = self
            .vectors
            .search(
                Collection::OntologyStatic,
                &embedding,
                1,
                Some(&PayloadFilter::eq("doc_type", doc_type::TOPOLOGY)),
            )
            .await?;
        let Some(hit) = hits.first() else {
            return Ok(None);
        };
        debug!(location = %molecule.name, template = %hit.id, score = hit.score, "topology vector match");
        if hit.score < self.config.topology_threshold {
            return Ok(None);
        }
        match find_template(&hit.id) {
            Some(template) => {
                self.identity.promote_location(location, template);
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }
}
