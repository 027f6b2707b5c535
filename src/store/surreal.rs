//! SurrealDB-backed graph and vector store.
//!
//! Nodes, edges and points live in `graph_node`, `graph_edge` and
//! `vector_point`. Record keys are bound with `type::thing`; payload field
//! names are validated before interpolation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::db::connection::WorldDb;
use crate::store::{
    rank, Collection, EdgeRecord, EdgeType, GraphPattern, GraphRow, GraphStore, NodeRecord,
    Payload, PayloadFilter, ScoredPoint, VectorPoint, VectorStore,
};
use crate::utils::sanitize::{validate_field_name, validate_identifier};
use crate::TaleforgeError;

#[derive(Deserialize)]
struct NodeRow {
    node_id: String,
    labels: Vec<String>,
    #[serde(default)]
    properties: Payload,
}

impl From<NodeRow> for NodeRecord {
    fn from(row: NodeRow) -> Self {
        NodeRecord {
            id: row.node_id,
            labels: row.labels,
            properties: row.properties,
        }
    }
}

#[derive(Deserialize)]
struct EdgeRow {
    from_id: String,
    to_id: String,
    edge_type: EdgeType,
    #[serde(default)]
    properties: Payload,
}

impl From<EdgeRow> for EdgeRecord {
    fn from(row: EdgeRow) -> Self {
        EdgeRecord {
            from_id: row.from_id,
            to_id: row.to_id,
            edge_type: row.edge_type,
            properties: row.properties,
        }
    }
}

#[derive(Deserialize)]
struct PointRow {
    point_id: String,
    vector: Vec<f32>,
    #[serde(default)]
    payload: Payload,
}

#[derive(Deserialize)]
struct ScoredRow {
    point_id: String,
    score: f32,
    #[serde(default)]
    payload: Payload,
}

const NODE_FIELDS: &str = "node_id, labels, properties";
const EDGE_FIELDS: &str = "from_id, to_id, edge_type, properties";

/// One SurrealDB connection serving both store traits.
#[derive(Clone)]
pub struct SurrealWorldStore {
    db: Arc<WorldDb>,
}

impl SurrealWorldStore {
    pub fn new(db: Arc<WorldDb>) -> Self {
        Self { db }
    }

    fn point_key(collection: Collection, id: &str) -> String {
        format!("{}/{}", collection.as_str(), id)
    }

    /// ` AND payload.f0 = $f0 ...` plus bindings.
    fn filter_clause(
        filter: Option<&PayloadFilter>,
    ) -> Result<(String, Vec<(String, serde_json::Value)>), TaleforgeError> {
        let mut clause = String::new();
        let mut bindings = Vec::new();
        if let Some(filter) = filter {
            for (i, (field, value)) in filter.must.iter().enumerate() {
                let field = validate_field_name(field)?;
                let param = format!("f{i}");
                clause.push_str(&format!(" AND payload.{field} = ${param}"));
                bindings.push((param, value.clone()));
            }
        }
        Ok((clause, bindings))
    }

    async fn edges(
        &self,
        condition: &str,
        bindings: Vec<(&'static str, String)>,
    ) -> Result<Vec<GraphRow>, TaleforgeError> {
        let query = format!(
            "SELECT {EDGE_FIELDS} FROM graph_edge WHERE {condition} ORDER BY from_id, edge_type, to_id"
        );
        let mut builder = self.db.query(&query);
        for (key, value) in bindings {
            builder = builder.bind((key, value));
        }
        let mut response = builder.await?;
        let rows: Vec<EdgeRow> = response.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| GraphRow::Edge(r.into()))
            .collect())
    }
}

#[async_trait]
impl GraphStore for SurrealWorldStore {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), TaleforgeError> {
        validate_identifier(&node.id)?;
        self.db
            .query(
                "UPSERT type::thing('graph_node', $id) CONTENT { \
                 node_id: $id, labels: $labels, properties: $properties, updated_at: time::now() }",
            )
            .bind(("id", node.id.clone()))
            .bind(("labels", node.labels.clone()))
            .bind(("properties", node.properties.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<(), TaleforgeError> {
        validate_identifier(&edge.from_id)?;
        validate_identifier(&edge.to_id)?;
        self.db
            .query(
                "UPSERT type::thing('graph_edge', $key) CONTENT { \
                 from_id: $from_id, to_id: $to_id, edge_type: $edge_type, properties: $properties }",
            )
            .bind(("key", edge.key()))
            .bind(("from_id", edge.from_id.clone()))
            .bind(("to_id", edge.to_id.clone()))
            .bind(("edge_type", edge.edge_type.as_str()))
            .bind(("properties", edge.properties.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn query(&self, pattern: &GraphPattern) -> Result<Vec<GraphRow>, TaleforgeError> {
        match pattern {
            GraphPattern::NodeById(id) => Ok(self
                .get_node(id)
                .await?
                .map(|n| vec![GraphRow::Node(n)])
                .unwrap_or_default()),
            GraphPattern::NodesByLabel(label) => {
                let mut response = self
                    .db
                    .query(format!(
                        "SELECT {NODE_FIELDS} FROM graph_node WHERE labels CONTAINS $label ORDER BY node_id"
                    ))
                    .bind(("label", label.clone()))
                    .await?;
                let rows: Vec<NodeRow> = response.take(0)?;
                Ok(rows.into_iter().map(|r| GraphRow::Node(r.into())).collect())
            }
            GraphPattern::EdgesFrom { from_id, edge_type } => match edge_type {
                Some(t) => {
                    self.edges(
                        "from_id = $id AND edge_type = $t",
                        vec![("id", from_id.clone()), ("t", t.as_str().to_string())],
                    )
                    .await
                }
                None => self.edges("from_id = $id", vec![("id", from_id.clone())]).await,
            },
            GraphPattern::EdgesTo { to_id, edge_type } => match edge_type {
                Some(t) => {
                    self.edges(
                        "to_id = $id AND edge_type = $t",
                        vec![("id", to_id.clone()), ("t", t.as_str().to_string())],
                    )
                    .await
                }
                None => self.edges("to_id = $id", vec![("id", to_id.clone())]).await,
            },
            GraphPattern::EdgesOfType(t) => {
                self.edges("edge_type = $t", vec![("t", t.as_str().to_string())])
                    .await
            }
        }
    }

    async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>, TaleforgeError> {
        let mut response = self
            .db
            .query(format!(
                "SELECT {NODE_FIELDS} FROM type::thing('graph_node', $id)"
            ))
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<NodeRow> = response.take(0)?;
        Ok(rows.into_iter().next().map(NodeRecord::from))
    }

    async fn delete_node(&self, id: &str) -> Result<(), TaleforgeError> {
        self.db
            .query("DELETE type::thing('graph_node', $id)")
            .bind(("id", id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn create_node_if_absent(&self, node: &NodeRecord) -> Result<bool, TaleforgeError> {
        validate_identifier(&node.id)?;
        let result = self
            .db
            .query(
                "CREATE type::thing('graph_node', $id) CONTENT { \
                 node_id: $id, labels: $labels, properties: $properties, updated_at: time::now() }",
            )
            .bind(("id", node.id.clone()))
            .bind(("labels", node.labels.clone()))
            .bind(("properties", node.properties.clone()))
            .await?
            .check();
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("already exists") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl VectorStore for SurrealWorldStore {
    async fn upsert_point(
        &self,
        collection: Collection,
        point: &VectorPoint,
    ) -> Result<(), TaleforgeError> {
        validate_identifier(&point.id)?;
        self.db
            .query(
                "UPSERT type::thing('vector_point', $key) CONTENT { \
                 collection: $collection, point_id: $id, vector: $vector, payload: $payload }",
            )
            .bind(("key", Self::point_key(collection, &point.id)))
            .bind(("collection", collection.as_str()))
            .bind(("id", point.id.clone()))
            .bind(("vector", point.vector.clone()))
            .bind(("payload", point.payload.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn search(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, TaleforgeError> {
        let (filter_clause, bindings) = Self::filter_clause(filter)?;
        // Brute-force cosine; collections are document-sized.
        let query = format!(
            "SELECT point_id, payload, vector::similarity::cosine(vector, $query_vector) AS score \
             FROM vector_point \
             WHERE collection = $collection AND array::len(vector) = $dims{filter_clause} \
             ORDER BY score DESC LIMIT {top_k}"
        );
        let mut builder = self
            .db
            .query(&query)
            .bind(("query_vector", vector.to_vec()))
            .bind(("collection", collection.as_str()))
            .bind(("dims", vector.len()));
        for (key, value) in bindings {
            builder = builder.bind((key, value));
        }
        let mut response = builder.await?;
        let rows: Vec<ScoredRow> = response.take(0)?;
        let mut hits: Vec<ScoredPoint> = rows
            .into_iter()
            .map(|r| ScoredPoint {
                id: r.point_id,
                score: r.score,
                payload: r.payload,
            })
            .collect();
        rank(&mut hits);
        Ok(hits)
    }

    async fn get_point(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<VectorPoint>, TaleforgeError> {
        let mut response = self
            .db
            .query("SELECT point_id, vector, payload FROM type::thing('vector_point', $key)")
            .bind(("key", Self::point_key(collection, id)))
            .await?;
        let rows: Vec<PointRow> = response.take(0)?;
        Ok(rows.into_iter().next().map(|r| VectorPoint {
            id: r.point_id,
            vector: r.vector,
            payload: r.payload,
        }))
    }

    async fn delete_point(&self, collection: Collection, id: &str) -> Result<(), TaleforgeError> {
        self.db
            .query("DELETE type::thing('vector_point', $key)")
            .bind(("key", Self::point_key(collection, id)))
            .await?
            .check()?;
        Ok(())
    }

    async fn scroll(
        &self,
        collection: Collection,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<VectorPoint>, TaleforgeError> {
        let (filter_clause, bindings) = Self::filter_clause(filter)?;
        let query = format!(
            "SELECT point_id, vector, payload FROM vector_point \
             WHERE collection = $collection{filter_clause} ORDER BY point_id"
        );
        let mut builder = self
            .db
            .query(&query)
            .bind(("collection", collection.as_str()));
        for (key, value) in bindings {
            builder = builder.bind((key, value));
        }
        let mut response = builder.await?;
        let rows: Vec<PointRow> = response.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| VectorPoint {
                id: r.point_id,
                vector: r.vector,
                payload: r.payload,
            })
            .collect())
    }
}
