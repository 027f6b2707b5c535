//! Store abstractions: a relationship graph and a vector store.
//!
//! Only the graph writer writes through these traits during a run; every
//! other component reads.

pub mod memory;
pub mod surreal;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TaleforgeError;

pub use memory::{InMemoryGraphStore, InMemoryVectorStore};
pub use surreal::SurrealWorldStore;

/// Non-vector properties carried by nodes, edges and points.
pub type Payload = Map<String, Value>;

/// Relationship types of the world graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Event → chronologically following Event on the main chain.
    Next,
    /// Later Event → earlier Event it references.
    Recalls,
    /// Event → participating Molecule.
    Involves,
    /// Event → Location.
    HappenedAt,
    /// Verb → acting Molecule.
    PerformedBy,
    /// Verb → target Molecule.
    Targets,
    /// Verb → Event it happened in.
    OccursIn,
    /// Vibe → Location.
    AttachedTo,
    /// Event → arc instance.
    PartOfArc,
    /// Arc instance → trope template.
    InstanceOf,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::Next => "NEXT",
            EdgeType::Recalls => "RECALLS",
            EdgeType::Involves => "INVOLVES",
            EdgeType::HappenedAt => "HAPPENED_AT",
            EdgeType::PerformedBy => "PERFORMED_BY",
            EdgeType::Targets => "TARGETS",
            EdgeType::OccursIn => "OCCURS_IN",
            EdgeType::AttachedTo => "ATTACHED_TO",
            EdgeType::PartOfArc => "PART_OF_ARC",
            EdgeType::InstanceOf => "INSTANCE_OF",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Payload,
}

impl NodeRecord {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub properties: Payload,
}

impl EdgeRecord {
    pub fn new(from_id: impl Into<String>, edge_type: EdgeType, to_id: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            edge_type,
            properties: Payload::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Upsert key: one edge per (from, type, to).
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.from_id, self.edge_type, self.to_id)
    }
}

/// Read patterns supported by the relationship store.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphPattern {
    NodeById(String),
    NodesByLabel(String),
    EdgesFrom {
        from_id: String,
        edge_type: Option<EdgeType>,
    },
    EdgesTo {
        to_id: String,
        edge_type: Option<EdgeType>,
    },
    EdgesOfType(EdgeType),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphRow {
    Node(NodeRecord),
    Edge(EdgeRecord),
}

impl GraphRow {
    pub fn into_node(self) -> Option<NodeRecord> {
        match self {
            GraphRow::Node(n) => Some(n),
            GraphRow::Edge(_) => None,
        }
    }

    pub fn into_edge(self) -> Option<EdgeRecord> {
        match self {
            GraphRow::Edge(e) => Some(e),
            GraphRow::Node(_) => None,
        }
    }
}

/// Transactional graph interface. Upserts are keyed and idempotent.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), TaleforgeError>;

    async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<(), TaleforgeError>;

    async fn query(&self, pattern: &GraphPattern) -> Result<Vec<GraphRow>, TaleforgeError>;

    async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>, TaleforgeError>;

    async fn delete_node(&self, id: &str) -> Result<(), TaleforgeError>;

    /// Insert only if no node with this id exists. Returns whether it was inserted.
    async fn create_node_if_absent(&self, node: &NodeRecord) -> Result<bool, TaleforgeError>;
}

/// Vector collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Static registries: primitives, topology templates, tropes.
    OntologyStatic,
    Molecules,
    Chronicle,
    Vibes,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::OntologyStatic,
        Collection::Molecules,
        Collection::Chronicle,
        Collection::Vibes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::OntologyStatic => "ontology_static",
            Collection::Molecules => "molecules",
            Collection::Chronicle => "chronicle",
            Collection::Vibes => "vibes",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Conjunction of payload equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub must: Vec<(String, Value)>,
}

impl PayloadFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::default().and(field, value)
    }

    pub fn and(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.must.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must
            .iter()
            .all(|(field, value)| payload.get(field) == Some(value))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_point(
        &self,
        collection: Collection,
        point: &VectorPoint,
    ) -> Result<(), TaleforgeError>;

    /// Ranked by cosine similarity, highest first.
    async fn search(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, TaleforgeError>;

    async fn get_point(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<VectorPoint>, TaleforgeError>;

    async fn delete_point(&self, collection: Collection, id: &str) -> Result<(), TaleforgeError>;

    /// Every point in the collection matching `filter`, in no particular order.
    async fn scroll(
        &self,
        collection: Collection,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<VectorPoint>, TaleforgeError>;
}

/// Order search hits by score descending, id ascending for stable ties.
pub(crate) fn rank(points: &mut [ScoredPoint]) {
    points.sort_by(|a, b| match b.score.partial_cmp(&a.score) {
        Some(std::cmp::Ordering::Equal) | None => a.id.cmp(&b.id),
        Some(ordering) => ordering,
    });
}
