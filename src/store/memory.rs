//! In-process stores for tests and dry runs.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::{
    rank, Collection, EdgeRecord, GraphPattern, GraphRow, GraphStore, NodeRecord, PayloadFilter,
    ScoredPoint, VectorPoint, VectorStore,
};
use crate::utils::math::cosine_similarity;
use crate::TaleforgeError;

#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: DashMap<String, NodeRecord>,
    edges: DashMap<String, EdgeRecord>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn edges_where(&self, pred: impl Fn(&EdgeRecord) -> bool) -> Vec<GraphRow> {
        let mut edges: Vec<EdgeRecord> = self
            .edges
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect();
        edges.sort_by_key(|e| e.key());
        edges.into_iter().map(GraphRow::Edge).collect()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), TaleforgeError> {
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<(), TaleforgeError> {
        self.edges.insert(edge.key(), edge.clone());
        Ok(())
    }

    async fn query(&self, pattern: &GraphPattern) -> Result<Vec<GraphRow>, TaleforgeError> {
        let rows = match pattern {
            GraphPattern::NodeById(id) => self
                .nodes
                .get(id)
                .map(|n| vec![GraphRow::Node(n.clone())])
                .unwrap_or_default(),
            GraphPattern::NodesByLabel(label) => {
                let mut nodes: Vec<NodeRecord> = self
                    .nodes
                    .iter()
                    .filter(|n| n.has_label(label))
                    .map(|n| n.value().clone())
                    .collect();
                nodes.sort_by(|a, b| a.id.cmp(&b.id));
                nodes.into_iter().map(GraphRow::Node).collect()
            }
            GraphPattern::EdgesFrom { from_id, edge_type } => self.edges_where(|e| {
                &e.from_id == from_id && edge_type.map_or(true, |t| t == e.edge_type)
            }),
            GraphPattern::EdgesTo { to_id, edge_type } => self.edges_where(|e| {
                &e.to_id == to_id && edge_type.map_or(true, |t| t == e.edge_type)
            }),
            GraphPattern::EdgesOfType(edge_type) => self.edges_where(|e| e.edge_type == *edge_type),
        };
        Ok(rows)
    }

    async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>, TaleforgeError> {
        Ok(self.nodes.get(id).map(|n| n.clone()))
    }

    async fn delete_node(&self, id: &str) -> Result<(), TaleforgeError> {
        self.nodes.remove(id);
        Ok(())
    }

    async fn create_node_if_absent(&self, node: &NodeRecord) -> Result<bool, TaleforgeError> {
        match self.nodes.entry(node.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(node.clone());
                Ok(true)
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    points: DashMap<(Collection, String), VectorPoint>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.points.iter().filter(|p| p.key().0 == collection).count()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert_point(
        &self,
        collection: Collection,
        point: &VectorPoint,
    ) -> Result<(), TaleforgeError> {
        self.points
            .insert((collection, point.id.clone()), point.clone());
        Ok(())
    }

    async fn search(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, TaleforgeError> {
        let mut hits: Vec<ScoredPoint> = self
            .points
            .iter()
            .filter(|p| p.key().0 == collection)
            .filter(|p| filter.map_or(true, |f| f.matches(&p.value().payload)))
            .map(|p| ScoredPoint {
                id: p.value().id.clone(),
                score: cosine_similarity(vector, &p.value().vector),
                payload: p.value().payload.clone(),
            })
            .collect();
        rank(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_point(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<VectorPoint>, TaleforgeError> {
        Ok(self
            .points
            .get(&(collection, id.to_string()))
            .map(|p| p.clone()))
    }

    async fn delete_point(&self, collection: Collection, id: &str) -> Result<(), TaleforgeError> {
        self.points.remove(&(collection, id.to_string()));
        Ok(())
    }

    async fn scroll(
        &self,
        collection: Collection,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<VectorPoint>, TaleforgeError> {
        let mut points: Vec<VectorPoint> = self
            .points
            .iter()
            .filter(|p| p.key().0 == collection)
            .filter(|p| filter.map_or(true, |f| f.matches(&p.value().payload)))
            .map(|p| p.value().clone())
            .collect();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(points)
    }
}
