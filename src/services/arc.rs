//! Arc detection over the committed main chain.
//!
//! Windows of consecutive Events are embedded as one text and matched
//! against the trope registry. Consecutive windows hitting the same trope
//! merge into one arc instance; different tropes may overlap freely.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ArcConfig;
use crate::embedding::EmbeddingService;
use crate::models::{ArcInstance, ArcInstanceId, Event, EventId};
use crate::registries::{doc_type, find_trope};
use crate::services::report::EntityFailure;
use crate::services::segmenter::sliding_windows;
use crate::services::writer::{CommitOutcome, GraphWriter, WorldEntity};
use crate::store::{Collection, GraphPattern, GraphStore, PayloadFilter};
use crate::TaleforgeError;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One window that matched a trope.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowHit {
    pub trope_id: String,
    /// Half-open range of main-chain positions.
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// Merged run of hits for one trope.
#[derive(Debug, Clone, PartialEq)]
pub struct ArcRun {
    pub trope_id: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

#[derive(Debug, Default, Serialize)]
pub struct ArcReport {
    pub arcs: Vec<ArcInstance>,
    pub tagged_events: usize,
    pub failures: Vec<EntityFailure>,
}

// ---------------------------------------------------------------------------
// Pure functions
// ---------------------------------------------------------------------------

/// Merge overlapping or touching windows of the same trope. Output is
/// ordered by start, then trope id.
pub fn merge_hits(hits: &[WindowHit]) -> Vec<ArcRun> {
    let mut by_trope: BTreeMap<&str, Vec<&WindowHit>> = BTreeMap::new();
    for hit in hits {
        by_trope.entry(hit.trope_id.as_str()).or_default().push(hit);
    }

    let mut runs = Vec::new();
    for (trope_id, mut group) in by_trope {
        group.sort_by_key(|h| (h.start, h.end));
        let mut current: Option<ArcRun> = None;
        for hit in group {
            match current.as_mut() {
                Some(run) if hit.start <= run.end => {
                    run.end = run.end.max(hit.end);
                    run.score = run.score.max(hit.score);
                }
                _ => {
                    runs.extend(current.take());
                    current = Some(ArcRun {
                        trope_id: trope_id.to_string(),
                        start: hit.start,
                        end: hit.end,
                        score: hit.score,
                    });
                }
            }
        }
        runs.extend(current);
    }
    runs.sort_by(|a, b| (a.start, &a.trope_id).cmp(&(b.start, &b.trope_id)));
    runs
}

/// Narrated Events of a document in chain order, as committed.
pub async fn main_chain(
    graph: &dyn GraphStore,
    document_id: &str,
) -> Result<Vec<Event>, TaleforgeError> {
    let rows = graph
        .query(&GraphPattern::NodesByLabel("Event".to_string()))
        .await?;
    let mut events: Vec<Event> = Vec::new();
    for node in rows.into_iter().filter_map(|r| r.into_node()) {
        let event: Event = serde_json::from_value(serde_json::Value::Object(node.properties))?;
        if event.document_id == document_id && event.sequence.is_some() {
            events.push(event);
        }
    }
    events.sort_by_key(|e| e.sequence);
    Ok(events)
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct ArcDetector<'a> {
    writer: &'a GraphWriter,
    embedder: &'a dyn EmbeddingService,
    config: &'a ArcConfig,
}

impl<'a> ArcDetector<'a> {
    pub fn new(
        writer: &'a GraphWriter,
        embedder: &'a dyn EmbeddingService,
        config: &'a ArcConfig,
    ) -> Self {
        Self {
            writer,
            embedder,
            config,
        }
    }

    /// `detect_arcs(full_chronicle)`: tag Event runs with the tropes they match.
    pub async fn detect_arcs(&self, document_id: &str) -> Result<ArcReport, TaleforgeError> {
        let events = main_chain(self.writer.graph_store().as_ref(), document_id).await?;
        let mut report = ArcReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let size = self.config.window.max(1);
        let overlap = size.saturating_sub(self.config.stride.max(1));
        let windows = sliding_windows(events.len(), size, overlap);
        let texts: Vec<String> = windows
            .iter()
            .map(|(start, end)| {
                events[*start..*end]
                    .iter()
                    .map(Event::semantic_text)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let vectors_store = self.writer.vector_store();
        let filter = PayloadFilter::eq("doc_type", doc_type::ARC_TEMPLATE);
        let mut hits = Vec::new();
        for ((start, end), vector) in windows.iter().zip(&vectors) {
            let matches = vectors_store
                .search(Collection::OntologyStatic, vector, 3, Some(&filter))
                .await?;
            for m in matches.into_iter().filter(|m| m.score >= self.config.threshold) {
                debug!(start, end, trope = %m.id, score = m.score, "arc window match");
                hits.push(WindowHit {
                    trope_id: m.id,
                    start: *start,
                    end: *end,
                    score: m.score,
                });
            }
        }

        let runs = merge_hits(&hits);
        let mut tags: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for run in runs {
            let label = find_trope(&run.trope_id)
                .map(|t| t.name.to_string())
                .unwrap_or_else(|| run.trope_id.clone());
            let arc = ArcInstance {
                id: ArcInstanceId::mint(),
                document_id: document_id.to_string(),
                trope_id: run.trope_id.clone(),
                label: label.clone(),
                events: events[run.start..run.end]
                    .iter()
                    .map(|e| e.id.clone())
                    .collect::<Vec<EventId>>(),
                score: run.score,
            };
            match self.writer.commit(WorldEntity::Arc(arc.clone())).await {
                Ok(CommitOutcome::Ack) => {
                    for position in run.start..run.end {
                        tags.entry(position).or_default().push(label.clone());
                    }
                    report.arcs.push(arc);
                }
                Ok(CommitOutcome::Retry(e)) | Err(e) => {
                    report.failures.push(EntityFailure::new(arc.id.as_str(), &e));
                }
            }
        }

        for (position, labels) in tags {
            let mut event = events[position].clone();
            event.arcs.extend(labels);
            let id = event.id.to_string();
            match self
                .writer
                .commit(WorldEntity::Event {
                    event,
                    vector: None,
                })
                .await
            {
                Ok(CommitOutcome::Ack) => report.tagged_events += 1,
                Ok(CommitOutcome::Retry(e)) | Err(e) => {
                    report.failures.push(EntityFailure::new(id, &e));
                }
            }
        }

        info!(
            document = document_id,
            arcs = report.arcs.len(),
            tagged = report.tagged_events,
            "Arc detection complete"
        );
        Ok(report)
    }
}
