//! Graph Writer: the only component that writes to the two stores.
//!
//! Each entity commits as one unit: the vector point first, then the graph
//! node. If the graph write fails the vector write is compensated (previous
//! point restored, or the new one deleted) so neither store observably
//! changed. Edges are buffered until both endpoints are committed.
//! Every commit runs in its own spawned task, so dropping the caller's
//! future cannot interrupt an entity half-way.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::models::{ArcInstance, Event, EventKind, Molecule, Verb, Vibe};
use crate::registries::OntologyEntry;
use crate::services::report::EntityFailure;
use crate::store::{
    Collection, EdgeRecord, EdgeType, GraphStore, NodeRecord, Payload, VectorPoint, VectorStore,
};
use crate::utils::retry::with_backoff;
use crate::TaleforgeError;

/// Anything the pipeline persists.
#[derive(Debug, Clone)]
pub enum WorldEntity {
    /// `vector: None` keeps the stored embedding (stat write-back, alias growth).
    Molecule {
        molecule: Molecule,
        vector: Option<Vec<f32>>,
    },
    Event {
        event: Event,
        vector: Option<Vec<f32>>,
    },
    Verb(Verb),
    Vibe(Vibe),
    Arc(ArcInstance),
    Ontology {
        entry: OntologyEntry,
        vector: Vec<f32>,
    },
    Edge(EdgeRecord),
}

impl WorldEntity {
    pub fn id(&self) -> String {
        match self {
            WorldEntity::Molecule { molecule, .. } => molecule.id.to_string(),
            WorldEntity::Event { event, .. } => event.id.to_string(),
            WorldEntity::Verb(v) => v.id.to_string(),
            WorldEntity::Vibe(v) => v.id.to_string(),
            WorldEntity::Arc(a) => a.id.to_string(),
            WorldEntity::Ontology { entry, .. } => entry.id.clone(),
            WorldEntity::Edge(e) => e.key(),
        }
    }
}

/// Result of one commit attempt.
#[derive(Debug)]
pub enum CommitOutcome {
    /// Both stores hold the entity.
    Ack,
    /// Transient failure after retries; neither store changed. Safe to resubmit.
    Retry(TaleforgeError),
}

#[derive(Debug, Default, Serialize)]
pub struct CommitReport {
    pub committed: Vec<String>,
    pub failures: Vec<EntityFailure>,
}

impl CommitReport {
    pub fn merge(&mut self, other: CommitReport) {
        self.committed.extend(other.committed);
        self.failures.extend(other.failures);
    }
}

/// Outcome of the post-Micro-Pass barrier.
#[derive(Debug, Default, Serialize)]
pub struct SettleReport {
    pub flushed_edges: usize,
    /// Edges whose endpoints never committed.
    pub dangling: Vec<EdgeRecord>,
    pub failures: Vec<EntityFailure>,
}

/// Physical rows derived from one entity.
struct Prepared {
    id: String,
    node: Option<NodeRecord>,
    point: Option<(Collection, VectorPoint)>,
    previous_point: Option<VectorPoint>,
    edges: Vec<EdgeRecord>,
}

struct WriterInner {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    committed: DashSet<String>,
    pending: Mutex<BTreeMap<String, EdgeRecord>>,
    edge_failures: Mutex<Vec<EntityFailure>>,
}

#[derive(Clone)]
pub struct GraphWriter {
    inner: Arc<WriterInner>,
}

fn to_payload<T: Serialize>(value: &T) -> Result<Payload, TaleforgeError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(TaleforgeError::Validation(format!(
            "expected an object payload, got {other}"
        ))),
    }
}

impl GraphWriter {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                graph,
                vectors,
                retry,
                committed: DashSet::new(),
                pending: Mutex::new(BTreeMap::new()),
                edge_failures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn graph_store(&self) -> Arc<dyn GraphStore> {
        self.inner.graph.clone()
    }

    pub fn vector_store(&self) -> Arc<dyn VectorStore> {
        self.inner.vectors.clone()
    }

    /// Commit one entity to both stores.
    ///
    /// `Ok(Ack)` when both stores hold it, `Ok(Retry)` when a transient
    /// failure left neither store changed, `Err` for permanent failures
    /// (a `ConsistencyViolation` if compensation itself failed).
    pub async fn commit(&self, entity: WorldEntity) -> Result<CommitOutcome, TaleforgeError> {
        let inner = self.inner.clone();
        let id = entity.id();
        match tokio::spawn(async move { inner.commit_entity(entity).await }).await {
            Ok(result) => result,
            Err(join) => Err(TaleforgeError::ConsistencyViolation {
                entity_id: id,
                message: format!("commit task aborted: {join}"),
            }),
        }
    }

    /// Commit a batch in order, collecting per-entity failures.
    pub async fn commit_all(&self, entities: Vec<WorldEntity>) -> CommitReport {
        let mut report = CommitReport::default();
        for entity in entities {
            let id = entity.id();
            match self.commit(entity).await {
                Ok(CommitOutcome::Ack) => report.committed.push(id),
                Ok(CommitOutcome::Retry(e)) | Err(e) => {
                    warn!(entity = %id, error = %e, "entity not committed");
                    report.failures.push(EntityFailure::new(id, &e));
                }
            }
        }
        report
    }

    /// Claim a one-shot marker node. Returns false if it already existed.
    pub async fn claim_marker(&self, id: &str, properties: Payload) -> Result<bool, TaleforgeError> {
        let node = NodeRecord {
            id: id.to_string(),
            labels: vec!["Marker".to_string()],
            properties,
        };
        let inner = self.inner.clone();
        let claimed = with_backoff(&inner.retry, "claim marker", || {
            inner.graph.create_node_if_absent(&node)
        })
        .await?;
        if claimed {
            self.inner.committed.insert(id.to_string());
        }
        Ok(claimed)
    }

    /// Whether `id` is known to be committed (locally or in the graph store).
    pub async fn is_committed(&self, id: &str) -> Result<bool, TaleforgeError> {
        self.inner.is_committed(id).await
    }

    /// Barrier: flush every edge whose endpoints are now committed and
    /// report what is left dangling.
    pub async fn settle(&self) -> Result<SettleReport, TaleforgeError> {
        let flushed_edges = self.inner.flush().await?;
        let dangling: Vec<EdgeRecord> = self.inner.pending.lock().await.values().cloned().collect();
        let mut failures: Vec<EntityFailure> =
            std::mem::take(&mut *self.inner.edge_failures.lock().await);
        for edge in &dangling {
            failures.push(EntityFailure::new(
                edge.key(),
                &TaleforgeError::ConsistencyViolation {
                    entity_id: edge.key(),
                    message: "edge endpoint never committed".to_string(),
                },
            ));
        }
        Ok(SettleReport {
            flushed_edges,
            dangling,
            failures,
        })
    }

    pub async fn pending_edges(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

impl WriterInner {
    async fn commit_entity(&self, entity: WorldEntity) -> Result<CommitOutcome, TaleforgeError> {
        let prepared = self.prepare(entity).await?;

        match self.write_dual(&prepared).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!(entity = %prepared.id, error = %e, "commit deferred");
                return Ok(CommitOutcome::Retry(e));
            }
            Err(e) => return Err(e),
        }

        if prepared.node.is_some() {
            self.committed.insert(prepared.id.clone());
        }
        if !prepared.edges.is_empty() {
            let mut pending = self.pending.lock().await;
            for edge in prepared.edges {
                pending.insert(edge.key(), edge);
            }
        }
        self.flush().await?;
        debug!(entity = %prepared.id, "committed");
        Ok(CommitOutcome::Ack)
    }

    async fn existing_point(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<VectorPoint>, TaleforgeError> {
        with_backoff(&self.retry, "read vector point", || {
            self.vectors.get_point(collection, id)
        })
        .await
    }

    /// Resolve `vector: None` against the store and build rows.
    async fn with_point(
        &self,
        id: &str,
        collection: Collection,
        vector: Option<Vec<f32>>,
        payload: Payload,
    ) -> Result<(Option<(Collection, VectorPoint)>, Option<VectorPoint>), TaleforgeError> {
        let previous = self.existing_point(collection, id).await?;
        let vector = match (vector, &previous) {
            (Some(v), _) => v,
            (None, Some(prev)) => prev.vector.clone(),
            (None, None) => {
                return Err(TaleforgeError::Validation(format!(
                    "'{id}' has no stored embedding and none was supplied"
                )))
            }
        };
        Ok((
            Some((
                collection,
                VectorPoint {
                    id: id.to_string(),
                    vector,
                    payload,
                },
            )),
            previous,
        ))
    }

    async fn prepare(&self, entity: WorldEntity) -> Result<Prepared, TaleforgeError> {
        match entity {
            WorldEntity::Molecule { molecule, vector } => {
                let id = molecule.id.to_string();
                let properties = to_payload(&molecule)?;
                let mut payload = properties.clone();
                payload.insert("doc_type".into(), json!("molecule"));
                let (point, previous_point) = self
                    .with_point(&id, Collection::Molecules, vector, payload)
                    .await?;
                Ok(Prepared {
                    node: Some(NodeRecord {
                        id: id.clone(),
                        labels: vec!["Molecule".into(), molecule.kind.as_str().to_string()],
                        properties,
                    }),
                    id,
                    point,
                    previous_point,
                    edges: Vec::new(),
                })
            }
            WorldEntity::Event { event, vector } => {
                let id = event.id.to_string();
                let properties = to_payload(&event)?;
                let mut payload = properties.clone();
                payload.insert("doc_type".into(), json!("event"));
                let (point, previous_point) = self
                    .with_point(&id, Collection::Chronicle, vector, payload)
                    .await?;

                let mut labels = vec!["Event".to_string()];
                if event.kind == EventKind::DetachedMemory {
                    labels.push("DetachedMemory".to_string());
                }
                let mut edges: Vec<EdgeRecord> = event
                    .participants
                    .iter()
                    .map(|p| EdgeRecord::new(id.clone(), EdgeType::Involves, p.as_str()))
                    .collect();
                if let Some(location) = &event.location {
                    edges.push(EdgeRecord::new(id.clone(), EdgeType::HappenedAt, location.as_str()));
                }
                Ok(Prepared {
                    node: Some(NodeRecord {
                        id: id.clone(),
                        labels,
                        properties,
                    }),
                    id,
                    point,
                    previous_point,
                    edges,
                })
            }
            WorldEntity::Verb(verb) => {
                let id = verb.id.to_string();
                let mut edges = vec![EdgeRecord::new(
                    id.clone(),
                    EdgeType::PerformedBy,
                    verb.actor.as_str(),
                )];
                if let Some(target) = &verb.target {
                    edges.push(EdgeRecord::new(id.clone(), EdgeType::Targets, target.as_str()));
                }
                if let Some(event) = &verb.event_id {
                    edges.push(EdgeRecord::new(id.clone(), EdgeType::OccursIn, event.as_str()));
                }
                Ok(Prepared {
                    node: Some(NodeRecord {
                        id: id.clone(),
                        labels: vec!["Verb".into(), verb.primitive_id.clone()],
                        properties: to_payload(&verb)?,
                    }),
                    id,
                    point: None,
                    previous_point: None,
                    edges,
                })
            }
            WorldEntity::Vibe(vibe) => {
                let id = vibe.id.to_string();
                let mut properties = to_payload(&vibe)?;
                properties.remove("embedding");
                let mut payload = properties.clone();
                payload.insert("doc_type".into(), json!("vibe"));
                let (point, previous_point) = self
                    .with_point(&id, Collection::Vibes, Some(vibe.embedding.clone()), payload)
                    .await?;
                Ok(Prepared {
                    node: Some(NodeRecord {
                        id: id.clone(),
                        labels: vec!["Vibe".into()],
                        properties,
                    }),
                    edges: vec![EdgeRecord::new(
                        id.clone(),
                        EdgeType::AttachedTo,
                        vibe.location_id.as_str(),
                    )],
                    id,
                    point,
                    previous_point,
                })
            }
            WorldEntity::Arc(arc) => {
                let id = arc.id.to_string();
                let mut edges = vec![EdgeRecord::new(
                    id.clone(),
                    EdgeType::InstanceOf,
                    arc.trope_id.clone(),
                )];
                for (position, event) in arc.events.iter().enumerate() {
                    edges.push(
                        EdgeRecord::new(event.as_str(), EdgeType::PartOfArc, id.clone())
                            .with_property("position", position as u64),
                    );
                }
                Ok(Prepared {
                    node: Some(NodeRecord {
                        id: id.clone(),
                        labels: vec!["ArcInstance".into()],
                        properties: to_payload(&arc)?,
                    }),
                    id,
                    point: None,
                    previous_point: None,
                    edges,
                })
            }
            WorldEntity::Ontology { entry, vector } => {
                let mut payload = entry.payload.clone();
                payload.insert("doc_type".into(), json!(entry.doc_type));
                payload.insert("name".into(), json!(entry.name));
                payload.insert("text".into(), json!(entry.text));
                let previous_point = self
                    .existing_point(Collection::OntologyStatic, &entry.id)
                    .await?;
                Ok(Prepared {
                    node: Some(NodeRecord {
                        id: entry.id.clone(),
                        labels: vec!["Ontology".into(), entry.doc_type.to_string()],
                        properties: payload.clone(),
                    }),
                    point: Some((
                        Collection::OntologyStatic,
                        VectorPoint {
                            id: entry.id.clone(),
                            vector,
                            payload,
                        },
                    )),
                    id: entry.id,
                    previous_point,
                    edges: Vec::new(),
                })
            }
            WorldEntity::Edge(edge) => Ok(Prepared {
                id: edge.key(),
                node: None,
                point: None,
                previous_point: None,
                edges: vec![edge],
            }),
        }
    }

    async fn write_dual(&self, prepared: &Prepared) -> Result<(), TaleforgeError> {
        if let Some((collection, point)) = &prepared.point {
            with_backoff(&self.retry, "vector upsert", || {
                self.vectors.upsert_point(*collection, point)
            })
            .await?;
        }

        let Some(node) = &prepared.node else {
            return Ok(());
        };
        let graph_result =
            with_backoff(&self.retry, "graph upsert", || self.graph.upsert_node(node)).await;
        let Err(graph_err) = graph_result else {
            return Ok(());
        };

        if let Some((collection, point)) = &prepared.point {
            let compensation = match &prepared.previous_point {
                Some(previous) => {
                    with_backoff(&self.retry, "vector restore", || {
                        self.vectors.upsert_point(*collection, previous)
                    })
                    .await
                }
                None => {
                    with_backoff(&self.retry, "vector rollback", || {
                        self.vectors.delete_point(*collection, &point.id)
                    })
                    .await
                }
            };
            if let Err(comp_err) = compensation {
                error!(
                    entity = %prepared.id,
                    graph_error = %graph_err,
                    rollback_error = %comp_err,
                    "stores diverged"
                );
                return Err(TaleforgeError::ConsistencyViolation {
                    entity_id: prepared.id.clone(),
                    message: format!(
                        "graph write failed ({graph_err}); vector rollback failed ({comp_err})"
                    ),
                });
            }
        }
        Err(graph_err)
    }

    async fn is_committed(&self, id: &str) -> Result<bool, TaleforgeError> {
        if self.committed.contains(id) {
            return Ok(true);
        }
        let found = with_backoff(&self.retry, "graph lookup", || self.graph.get_node(id))
            .await?
            .is_some();
        if found {
            self.committed.insert(id.to_string());
        }
        Ok(found)
    }

    /// Write every buffered edge whose endpoints are committed.
    async fn flush(&self) -> Result<usize, TaleforgeError> {
        let candidates: Vec<EdgeRecord> = self.pending.lock().await.values().cloned().collect();
        let mut written = 0;
        for edge in candidates {
            if !self.is_committed(&edge.from_id).await? || !self.is_committed(&edge.to_id).await? {
                continue;
            }
            // Another flush may have taken it.
            if self.pending.lock().await.remove(&edge.key()).is_none() {
                continue;
            }
            match with_backoff(&self.retry, "edge upsert", || self.graph.upsert_edge(&edge)).await
            {
                Ok(()) => written += 1,
                Err(e) if e.is_transient() => {
                    self.pending.lock().await.insert(edge.key(), edge);
                }
                Err(e) => {
                    warn!(edge = %edge.key(), error = %e, "edge write failed");
                    self.edge_failures
                        .lock()
                        .await
                        .push(EntityFailure::new(edge.key(), &e));
                }
            }
        }
        Ok(written)
    }
}
