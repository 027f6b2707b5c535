//! Chronicle: the NEXT chain, RECALLS edges and detached memories, through
//! full pipeline runs.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::builders::{beats, cast, empty, segments, BeatBuilder, BoundaryBuilder};
use common::harness::EdgeRejectingGraphStore;
use common::{test_config, HashEmbedding, ScriptedLlm, TestWorld};
use taleforge::services::arc::main_chain;
use taleforge::services::Pipeline;
use taleforge::store::{EdgeType, GraphPattern, GraphRow, GraphStore};

const MEETING: &str = "Alice met the Queen in the garden. The Queen smiled at Alice.";
const MEMORY: &str = "Alice remembered the day the tower fell. She shivered in the cold.";
const COLLAPSE: &str = "The tower fell with a roar. Dust filled the sky.";

fn story(parts: &[&str]) -> String {
    parts.join("\n\n")
}

fn meeting_beat() -> BeatBuilder {
    BeatBuilder::new("Alice meets the Queen")
        .description("Alice meets the Queen in the garden.")
        .quote("Alice met the Queen in the garden.")
        .archetype("conflict_social")
        .participant("Alice", "agent")
        .participant("Queen", "agent")
}

/// LLM for a story made of the three paragraphs above (any subset, in order).
fn story_llm(memory_beat: BeatBuilder) -> ScriptedLlm {
    ScriptedLlm::new()
        .on("segment", |request| {
            // One scene per paragraph; scene starts are found by content.
            let mut boundaries = Vec::new();
            for line in request.prompt.lines() {
                let Some(rest) = line.strip_prefix('[') else {
                    continue;
                };
                let Some((index, text)) = rest.split_once("] ") else {
                    continue;
                };
                let Ok(index) = index.parse::<usize>() else {
                    continue;
                };
                let boundary = if text.starts_with("Alice met") {
                    BoundaryBuilder::new(index, "Garden meeting").at("the garden")
                } else if text.starts_with("Alice remembered") {
                    BoundaryBuilder::new(index, "Remembering")
                } else if text.starts_with("The tower fell") {
                    BoundaryBuilder::new(index, "The fall").at("the old tower")
                } else {
                    continue;
                };
                boundaries.push(boundary);
            }
            Ok(segments(boundaries))
        })
        .reply("cast", cast(&[("Alice", "agent")]))
        .reply_by_prompt(
            "beats",
            vec![
                ("Alice met the Queen", beats(vec![meeting_beat()])),
                ("Alice remembered", beats(vec![memory_beat])),
                (
                    "with a roar",
                    beats(vec![BeatBuilder::new("The tower fell")
                        .description("The tower fell.")
                        .quote("The tower fell with a roar.")
                        .archetype("transition")]),
                ),
            ],
            empty("beats"),
        )
        .reply("resolve_identity", json!({ "selected_id": null }))
        .reply("actions", empty("actions"))
        .reply("vibes", empty("snippets"))
}

fn title(properties: &serde_json::Map<String, Value>) -> &str {
    properties["title"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_events_chain_in_narration_order() {
    let world = TestWorld::new(
        story_llm(BeatBuilder::new("Alice shivers").description("Alice shivers in the cold.")),
        HashEmbedding::new(),
    );
    let pipeline = world.pipeline(test_config());

    let report = pipeline
        .run("wonderland", &story(&[MEETING, MEMORY, COLLAPSE]))
        .await
        .unwrap();

    assert_eq!(report.episodes.len(), 3);
    assert_eq!(report.events, 3);
    assert_eq!(report.detached_memories, 0);
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let chain = main_chain(world.graph.as_ref(), "wonderland").await.unwrap();
    let titles: Vec<&str> = chain.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["Alice meets the Queen", "Alice shivers", "The tower fell"]);
    let sequences: Vec<Option<u64>> = chain.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![Some(0), Some(1), Some(2)]);

    // Exactly one NEXT edge between consecutive events, none dangling.
    let next = world.edges(EdgeType::Next).await;
    assert_eq!(next.len(), 2);
    for pair in chain.windows(2) {
        assert!(next
            .iter()
            .any(|e| e.from_id == pair[0].id.as_str() && e.to_id == pair[1].id.as_str()));
    }

    // Every event is anchored inside its episode.
    for (event, episode) in chain.iter().zip(&report.episodes) {
        let span = event.span.unwrap();
        assert!(episode.span.start <= span.start && span.end <= episode.span.end);
    }
}

#[tokio::test]
async fn test_participants_and_location_edges() {
    let world = TestWorld::new(
        story_llm(BeatBuilder::new("Alice shivers").description("Alice shivers in the cold.")),
        HashEmbedding::new(),
    );
    let pipeline = world.pipeline(test_config());
    pipeline.run("garden-only", MEETING).await.unwrap();

    let event = world
        .node_named("Event", "Alice meets the Queen")
        .await
        .expect("event committed");
    let alice = world.node_named("Molecule", "Alice").await.unwrap();
    let queen = world.node_named("Molecule", "Queen").await.unwrap();
    let garden = world.node_named("Molecule", "the garden").await.unwrap();

    let involves = world.edges(EdgeType::Involves).await;
    for molecule in [&alice, &queen] {
        assert!(involves
            .iter()
            .any(|e| e.from_id == event.id && e.to_id == molecule.id));
    }
    let happened_at = world.edges(EdgeType::HappenedAt).await;
    assert!(happened_at
        .iter()
        .any(|e| e.from_id == event.id && e.to_id == garden.id));
}

#[tokio::test]
async fn test_flashback_recalls_narrated_event() {
    let world = TestWorld::new(
        story_llm(
            BeatBuilder::new("Alice remembers the meeting")
                .description("Alice thinks back to the garden.")
                .quote("Alice remembered the day the tower fell.")
                .recalls("Alice meets the Queen in the garden."),
        ),
        HashEmbedding::new(),
    );
    let pipeline = world.pipeline(test_config());

    let report = pipeline
        .run("recall", &story(&[MEETING, MEMORY]))
        .await
        .unwrap();
    assert_eq!(report.detached_memories, 0);

    let meeting = world.node_named("Event", "Alice meets the Queen").await.unwrap();
    let memory = world
        .node_named("Event", "Alice remembers the meeting")
        .await
        .unwrap();
    let recalls = world.edges(EdgeType::Recalls).await;
    assert_eq!(recalls.len(), 1);
    assert_eq!(recalls[0].from_id, memory.id);
    assert_eq!(recalls[0].to_id, meeting.id);

    // The flashback still takes its narration slot on the main chain.
    assert_eq!(memory.properties["sequence"], json!(1));
    assert_eq!(memory.properties["flashback"], json!(true));
}

#[tokio::test]
async fn test_unresolved_flashback_creates_detached_memory() {
    let world = TestWorld::new(
        story_llm(
            BeatBuilder::new("Alice remembers the fall")
                .description("Alice remembers the fall of the tower.")
                .quote("Alice remembered the day the tower fell.")
                .recalls("the tower fell"),
        ),
        HashEmbedding::new(),
    );
    let pipeline = world.pipeline(test_config());

    let report = pipeline
        .run("tower", &story(&[MEETING, MEMORY]))
        .await
        .unwrap();
    assert_eq!(report.events, 2);
    assert_eq!(report.detached_memories, 1);

    let detached = world.nodes("DetachedMemory").await;
    assert_eq!(detached.len(), 1);
    let memory = &detached[0];
    assert_eq!(memory.properties["kind"], json!("detached_memory"));
    assert!(memory.properties.get("sequence").map_or(true, Value::is_null));
    assert_eq!(title(&memory.properties), "the tower fell");

    let from = world
        .node_named("Event", "Alice remembers the fall")
        .await
        .unwrap();
    let recalls = world.edges(EdgeType::Recalls).await;
    assert_eq!(recalls.len(), 1);
    assert_eq!(recalls[0].from_id, from.id);
    assert_eq!(recalls[0].to_id, memory.id);

    // Detached memories never join the main chain.
    let chain = main_chain(world.graph.as_ref(), "tower").await.unwrap();
    assert_eq!(chain.len(), 2);
    assert!(chain.iter().all(|e| e.id.as_str() != memory.id));
    assert!(world
        .edges(EdgeType::Next)
        .await
        .iter()
        .all(|e| e.from_id != memory.id && e.to_id != memory.id));
}

#[tokio::test]
async fn test_detached_memory_promoted_when_narrated() {
    let world = TestWorld::new(
        story_llm(
            BeatBuilder::new("Alice remembers the fall")
                .description("Alice remembers the fall of the tower.")
                .quote("Alice remembered the day the tower fell.")
                .recalls("the tower fell"),
        ),
        HashEmbedding::new(),
    );
    let pipeline = world.pipeline(test_config());

    let report = pipeline
        .run("promotion", &story(&[MEETING, MEMORY, COLLAPSE]))
        .await
        .unwrap();
    assert_eq!(report.events, 3);
    assert_eq!(report.detached_memories, 1);

    // The narrated event took over the placeholder id, so the RECALLS edge
    // now points at a main-chain event.
    assert!(world.nodes("DetachedMemory").await.is_empty());
    let fall = world.node_named("Event", "The tower fell").await.unwrap();
    assert_eq!(fall.properties["kind"], json!("narrated"));
    assert_eq!(fall.properties["sequence"], json!(2));

    let recalls = world.edges(EdgeType::Recalls).await;
    assert_eq!(recalls.len(), 1);
    assert_eq!(recalls[0].to_id, fall.id);

    let chain = main_chain(world.graph.as_ref(), "promotion").await.unwrap();
    assert_eq!(chain.last().unwrap().id.as_str(), fall.id);
}

#[tokio::test]
async fn test_failed_beat_extraction_keeps_chain_connected() {
    let llm = story_llm(BeatBuilder::new("unused")).on("beats", |request| {
        if request.prompt.contains("Alice remembered") {
            Ok(json!({ "not_beats": true }))
        } else {
            Ok(beats(vec![BeatBuilder::new("Something happens")
                .description("Something happens.")]))
        }
    });
    let world = TestWorld::new(llm, HashEmbedding::new());
    let pipeline = world.pipeline(test_config());

    let report = pipeline
        .run("fallback", &story(&[MEETING, MEMORY, COLLAPSE]))
        .await
        .unwrap();

    // The unparseable scene still contributes one fallback event.
    assert_eq!(report.events, 3);
    let chain = main_chain(world.graph.as_ref(), "fallback").await.unwrap();
    assert_eq!(chain[1].title, "Remembering");
    assert_eq!(world.edges(EdgeType::Next).await.len(), 2);
}

#[tokio::test]
async fn test_refused_next_edge_still_advances_chain() {
    let graph = Arc::new(EdgeRejectingGraphStore::new(EdgeType::Next, 1).aborting());
    let world = TestWorld::new(
        story_llm(BeatBuilder::new("Alice shivers").description("Alice shivers in the cold.")),
        HashEmbedding::new(),
    );
    let pipeline = Pipeline::new(
        world.llm.clone(),
        world.embedder.clone(),
        graph.clone(),
        world.vectors.clone(),
        test_config(),
    );

    let report = pipeline
        .run("refused", &story(&[MEETING, MEMORY, COLLAPSE]))
        .await
        .unwrap();

    // The second Event is stored; only its incoming edge is lost, and the
    // aborted commit is reported once.
    assert_eq!(report.events, 3);
    assert_eq!(report.failures.len(), 1);
    let chain = main_chain(&graph.inner, "refused").await.unwrap();
    let sequences: Vec<Option<u64>> = chain.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![Some(0), Some(1), Some(2)]);

    let next: Vec<_> = graph
        .query(&GraphPattern::EdgesOfType(EdgeType::Next))
        .await
        .unwrap()
        .into_iter()
        .filter_map(GraphRow::into_edge)
        .collect();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].from_id, chain[1].id.as_str());
    assert_eq!(next[0].to_id, chain[2].id.as_str());
}
