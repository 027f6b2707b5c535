//! Static registries: Game Primitives, Topology Templates, tropes and the
//! bias tables. Read-only during a pipeline run.

pub mod bias;
pub mod primitives;
pub mod topology;
pub mod tropes;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::json;
use tracing::info;

use crate::embedding::EmbeddingService;
use crate::services::writer::{GraphWriter, WorldEntity};
use crate::store::{Collection, Payload, PayloadFilter};
use crate::TaleforgeError;

pub use bias::EntityType;
pub use primitives::{find_primitive, ActionSystem, GamePrimitive, PRIMITIVES};
pub use topology::{find_template, TopologyTemplate, TOPOLOGY_TEMPLATES};
pub use tropes::{find_trope, TropeTemplate, TROPES};

/// `doc_type` payload values in `ontology_static`.
pub mod doc_type {
    pub const PRIMITIVE: &str = "primitive";
    pub const TOPOLOGY: &str = "topology";
    pub const ARC_TEMPLATE: &str = "arc_template";
}

/// One registry item as stored in `ontology_static` and the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct OntologyEntry {
    pub id: String,
    pub doc_type: &'static str,
    pub name: String,
    /// Text embedded for similarity search.
    pub text: String,
    pub payload: Payload,
}

/// Every registry item, in registry order.
pub fn ontology_entries() -> Vec<OntologyEntry> {
    let version = registry_version();
    let mut entries = Vec::new();

    for p in PRIMITIVES {
        let mut payload = Payload::new();
        payload.insert("system".into(), json!(p.system.as_str()));
        payload.insert("profile".into(), json!(p.profile));
        entries.push(OntologyEntry {
            id: p.id.to_string(),
            doc_type: doc_type::PRIMITIVE,
            name: p.name.to_string(),
            text: p.semantic_text(),
            payload,
        });
    }
    for t in TOPOLOGY_TEMPLATES {
        let mut payload = Payload::new();
        payload.insert("layout".into(), json!(t.layout));
        payload.insert("properties".into(), json!(t.properties));
        payload.insert("profile".into(), json!(t.profile));
        entries.push(OntologyEntry {
            id: t.id.to_string(),
            doc_type: doc_type::TOPOLOGY,
            name: t.name.to_string(),
            text: t.semantic_text(),
            payload,
        });
    }
    for t in TROPES {
        entries.push(OntologyEntry {
            id: t.id.to_string(),
            doc_type: doc_type::ARC_TEMPLATE,
            name: t.name.to_string(),
            text: t.semantic_text(),
            payload: Payload::new(),
        });
    }

    for entry in &mut entries {
        entry
            .payload
            .insert("registry_version".into(), json!(version.clone()));
    }
    entries
}

/// Content hash of the registries; changes whenever an item's text changes.
pub fn registry_version() -> String {
    let mut hasher = DefaultHasher::new();
    for p in PRIMITIVES {
        p.id.hash(&mut hasher);
        p.semantic_text().hash(&mut hasher);
    }
    for t in TOPOLOGY_TEMPLATES {
        t.id.hash(&mut hasher);
        t.semantic_text().hash(&mut hasher);
    }
    for t in TROPES {
        t.id.hash(&mut hasher);
        t.semantic_text().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// Embed every registry item and commit it to `ontology_static`.
///
/// Skips the work when the stored items already carry the current
/// registry version. Returns the number of items written.
pub async fn index_registries(
    writer: &GraphWriter,
    embedder: &dyn EmbeddingService,
    force: bool,
) -> Result<usize, TaleforgeError> {
    let entries = ontology_entries();
    let version = registry_version();

    if !force {
        let current = writer
            .vector_store()
            .scroll(
                Collection::OntologyStatic,
                Some(&PayloadFilter::eq("registry_version", version.clone())),
            )
            .await?;
        if current.len() == entries.len() {
            info!("Registries up to date (version {})", version);
            return Ok(0);
        }
    }

    let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await?;
    if vectors.len() != entries.len() {
        return Err(TaleforgeError::service(
            "embedding",
            format!("expected {} vectors, got {}", entries.len(), vectors.len()),
        ));
    }

    let count = entries.len();
    let batch: Vec<WorldEntity> = entries
        .into_iter()
        .zip(vectors)
        .map(|(entry, vector)| WorldEntity::Ontology { entry, vector })
        .collect();
    let report = writer.commit_all(batch).await;
    if let Some(failure) = report.failures.first() {
        return Err(TaleforgeError::Database(format!(
            "registry indexing failed for '{}': {}",
            failure.entity_id, failure.message
        )));
    }

    info!("Indexed {} registry items (version {})", count, version);
    Ok(count)
}
