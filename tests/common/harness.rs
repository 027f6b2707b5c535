//! Test harness: deterministic services and store lifecycle.
//!
//! `HashEmbedding` and `ScriptedLlm` replace the remote providers so a
//! pipeline run is reproducible; `TestWorld` wires them to in-memory stores
//! and `TestHarness` provides an isolated SurrealDB instance per test.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use taleforge::config::{PipelineConfig, RetryPolicy};
use taleforge::db::{apply_schema, init_db, DbConfig, WorldDb};
use taleforge::embedding::EmbeddingService;
use taleforge::llm::{LlmRequest, LlmService};
use taleforge::services::Pipeline;
use taleforge::store::{
    Collection, EdgeRecord, EdgeType, GraphPattern, GraphRow, GraphStore, InMemoryGraphStore,
    InMemoryVectorStore, NodeRecord, PayloadFilter, ScoredPoint, SurrealWorldStore, VectorPoint,
    VectorStore,
};
use taleforge::TaleforgeError;

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

/// Bag-of-words embedding: every lowercase word adds 1.0 to a hashed
/// dimension. Texts with the same word multiset embed identically.
pub struct HashEmbedding {
    dims: usize,
    /// (needle, stand-in): any text containing `needle` embeds as `stand-in`.
    overrides: Vec<(String, String)>,
    calls: AtomicUsize,
}

impl HashEmbedding {
    pub fn new() -> Self {
        Self {
            dims: 256,
            overrides: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make any text containing `needle` embed exactly like `stand_in`.
    pub fn equate(mut self, needle: &str, stand_in: impl Into<String>) -> Self {
        self.overrides
            .push((needle.to_lowercase(), stand_in.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let source = self
            .overrides
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
            .map(|(_, stand_in)| stand_in.to_lowercase())
            .unwrap_or(lower);

        let mut v = vec![0.0f32; self.dims];
        for word in source
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedding {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, TaleforgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TaleforgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

type Handler = Box<dyn Fn(&LlmRequest) -> Result<Value, TaleforgeError> + Send + Sync>;

/// LLM answering per task name. Unscripted tasks fail permanently, which
/// sends callers down their fallback paths.
pub struct ScriptedLlm {
    handlers: HashMap<String, Handler>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on<F>(mut self, task: &str, handler: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<Value, TaleforgeError> + Send + Sync + 'static,
    {
        self.handlers.insert(task.to_string(), Box::new(handler));
        self
    }

    /// Always answer `task` with `value`.
    pub fn reply(self, task: &str, value: Value) -> Self {
        self.on(task, move |_| Ok(value.clone()))
    }

    /// Answer `task` with the first `(needle, value)` whose needle occurs in
    /// the prompt, else `fallback`.
    pub fn reply_by_prompt(self, task: &str, cases: Vec<(&str, Value)>, fallback: Value) -> Self {
        let cases: Vec<(String, Value)> = cases
            .into_iter()
            .map(|(needle, value)| (needle.to_string(), value))
            .collect();
        self.on(task, move |request| {
            Ok(cases
                .iter()
                .find(|(needle, _)| request.prompt.contains(needle.as_str()))
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| fallback.clone()))
        })
    }

    /// Adjudicate `task` by picking the candidate whose description
    /// contains `needle` (case-insensitive), or none.
    pub fn pick_candidate(self, task: &str, needle: &str) -> Self {
        let needle = needle.to_lowercase();
        self.on(task, move |request| {
            let selected = candidates(&request.prompt)
                .into_iter()
                .find(|(_, text)| text.to_lowercase().contains(&needle))
                .map(|(id, _)| id);
            Ok(json!({ "selected_id": selected, "confidence": 0.9 }))
        })
    }

    pub fn calls(&self, task: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .count()
    }

    pub fn requests(&self, task: &str) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .cloned()
            .collect()
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<Value, TaleforgeError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.handlers.get(&request.task) {
            Some(handler) => handler(request),
            None => Err(TaleforgeError::service(
                "llm",
                format!("unscripted task '{}'", request.task),
            )),
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// `(id, description)` pairs listed in an adjudication prompt.
pub fn candidates(prompt: &str) -> Vec<(String, String)> {
    prompt
        .lines()
        .filter_map(|line| line.strip_prefix("- id: "))
        .filter_map(|rest| {
            let (id, text) = rest.split_once(" | ")?;
            Some((id.trim().to_string(), text.to_string()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Defaults with millisecond retries and no snapshot.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        ..PipelineConfig::default()
    };
    config.stages.snapshot_registry = false;
    config.stages.detect_arcs = false;
    config
}

// ---------------------------------------------------------------------------
// In-memory world
// ---------------------------------------------------------------------------

/// A pipeline over in-memory stores and scripted services.
pub struct TestWorld {
    pub graph: Arc<InMemoryGraphStore>,
    pub vectors: Arc<InMemoryVectorStore>,
    pub llm: Arc<ScriptedLlm>,
    pub embedder: Arc<HashEmbedding>,
}

impl TestWorld {
    pub fn new(llm: ScriptedLlm, embedder: HashEmbedding) -> Self {
        Self {
            graph: Arc::new(InMemoryGraphStore::new()),
            vectors: Arc::new(InMemoryVectorStore::new()),
            llm: Arc::new(llm),
            embedder: Arc::new(embedder),
        }
    }

    pub fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(
            self.llm.clone(),
            self.embedder.clone(),
            self.graph.clone(),
            self.vectors.clone(),
            config,
        )
    }

    pub async fn nodes(&self, label: &str) -> Vec<NodeRecord> {
        self.graph
            .query(&GraphPattern::NodesByLabel(label.to_string()))
            .await
            .expect("label query")
            .into_iter()
            .filter_map(GraphRow::into_node)
            .collect()
    }

    pub async fn edges(&self, edge_type: EdgeType) -> Vec<EdgeRecord> {
        self.graph
            .query(&GraphPattern::EdgesOfType(edge_type))
            .await
            .expect("edge query")
            .into_iter()
            .filter_map(GraphRow::into_edge)
            .collect()
    }

    /// Node whose `title` (Events) or `name` (Molecules) equals `text`.
    pub async fn node_named(&self, label: &str, text: &str) -> Option<NodeRecord> {
        self.nodes(label).await.into_iter().find(|n| {
            ["title", "name"]
                .iter()
                .any(|k| n.properties.get(*k).and_then(Value::as_str) == Some(text))
        })
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Vector store whose next `transient_failures` upserts fail transiently.
pub struct FlakyVectorStore {
    pub inner: InMemoryVectorStore,
    pub transient_failures: AtomicUsize,
}

impl FlakyVectorStore {
    pub fn new(transient_failures: usize) -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            transient_failures: AtomicUsize::new(transient_failures),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn upsert_point(
        &self,
        collection: Collection,
        point: &VectorPoint,
    ) -> Result<(), TaleforgeError> {
        let left = self.transient_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.transient_failures.store(left - 1, Ordering::SeqCst);
            return Err(TaleforgeError::transient("vector_store", "connection reset"));
        }
        self.inner.upsert_point(collection, point).await
    }

    async fn search(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<ScoredPoint>, TaleforgeError> {
        self.inner.search(collection, vector, top_k, filter).await
    }

    async fn get_point(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<VectorPoint>, TaleforgeError> {
        self.inner.get_point(collection, id).await
    }

    async fn delete_point(&self, collection: Collection, id: &str) -> Result<(), TaleforgeError> {
        self.inner.delete_point(collection, id).await
    }

    async fn scroll(
        &self,
        collection: Collection,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<VectorPoint>, TaleforgeError> {
        self.inner.scroll(collection, filter).await
    }
}

/// Graph store that rejects every node carrying `reject_label`.
pub struct RejectingGraphStore {
    pub inner: InMemoryGraphStore,
    pub reject_label: String,
    /// Rejections are transient (retryable) instead of permanent.
    pub transient: bool,
}

impl RejectingGraphStore {
    pub fn new(reject_label: &str, transient: bool) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            reject_label: reject_label.to_string(),
            transient,
        }
    }
}

#[async_trait]
impl GraphStore for RejectingGraphStore {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), TaleforgeError> {
        if node.has_label(&self.reject_label) {
            return Err(if self.transient {
                TaleforgeError::transient("graph_store", "write timeout")
            } else {
                TaleforgeError::Database(format!("constraint violated for {}", node.id))
            });
        }
        self.inner.upsert_node(node).await
    }

    async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<(), TaleforgeError> {
        self.inner.upsert_edge(edge).await
    }

    async fn query(&self, pattern: &GraphPattern) -> Result<Vec<GraphRow>, TaleforgeError> {
        self.inner.query(pattern).await
    }

    async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>, TaleforgeError> {
        self.inner.get_node(id).await
    }

    async fn delete_node(&self, id: &str) -> Result<(), TaleforgeError> {
        self.inner.delete_node(id).await
    }

    async fn create_node_if_absent(&self, node: &NodeRecord) -> Result<bool, TaleforgeError> {
        self.inner.create_node_if_absent(node).await
    }
}

/// Graph store that refuses the next `rejections` edges of `edge_type`.
pub struct EdgeRejectingGraphStore {
    pub inner: InMemoryGraphStore,
    pub edge_type: EdgeType,
    pub rejections: AtomicUsize,
    /// Refusal kills the commit task instead of returning an error.
    pub abort: bool,
}

impl EdgeRejectingGraphStore {
    pub fn new(edge_type: EdgeType, rejections: usize) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            edge_type,
            rejections: AtomicUsize::new(rejections),
            abort: false,
        }
    }

    pub fn aborting(mut self) -> Self {
        self.abort = true;
        self
    }
}

#[async_trait]
impl GraphStore for EdgeRejectingGraphStore {
    async fn upsert_node(&self, node: &NodeRecord) -> Result<(), TaleforgeError> {
        self.inner.upsert_node(node).await
    }

    async fn upsert_edge(&self, edge: &EdgeRecord) -> Result<(), TaleforgeError> {
        if edge.edge_type == self.edge_type {
            let left = self.rejections.load(Ordering::SeqCst);
            if left > 0 {
                self.rejections.store(left - 1, Ordering::SeqCst);
                if self.abort {
                    panic!("connection dropped writing {}", edge.key());
                }
                return Err(TaleforgeError::Database(format!(
                    "edge {} -> {} refused",
                    edge.from_id, edge.to_id
                )));
            }
        }
        self.inner.upsert_edge(edge).await
    }

    async fn query(&self, pattern: &GraphPattern) -> Result<Vec<GraphRow>, TaleforgeError> {
        self.inner.query(pattern).await
    }

    async fn get_node(&self, id: &str) -> Result<Option<NodeRecord>, TaleforgeError> {
        self.inner.get_node(id).await
    }

    async fn delete_node(&self, id: &str) -> Result<(), TaleforgeError> {
        self.inner.delete_node(id).await
    }

    async fn create_node_if_absent(&self, node: &NodeRecord) -> Result<bool, TaleforgeError> {
        self.inner.create_node_if_absent(node).await
    }
}

// ---------------------------------------------------------------------------
// SurrealDB lifecycle
// ---------------------------------------------------------------------------

/// Isolated embedded database in a temporary directory, removed on drop.
pub struct TestHarness {
    pub db: Arc<WorldDb>,
    /// Kept alive while the harness exists.
    pub temp_dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory for test database");
        let config = DbConfig::Embedded {
            path: Some(temp_dir.path().join("test.db").to_string_lossy().into_owned()),
        };
        let db = init_db(&config, temp_dir.path())
            .await
            .expect("Failed to initialize test database");
        apply_schema(&db)
            .await
            .expect("Failed to apply schema to test database");
        Self {
            db: Arc::new(db),
            temp_dir,
        }
    }

    pub fn store(&self) -> Arc<SurrealWorldStore> {
        Arc::new(SurrealWorldStore::new(self.db.clone()))
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}
