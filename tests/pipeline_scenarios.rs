//! End-to-end runs: mechanics, atmosphere, arcs and the report.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::builders::{
    actions, beats, cast, empty, segments, vibes, ActionBuilder, BeatBuilder, BoundaryBuilder,
};
use common::{test_config, HashEmbedding, ScriptedLlm, TestWorld};
use taleforge::config::VibeAggregationConfig;
use taleforge::models::{aggregation_policy, Mood, MoleculeId};
use taleforge::registries::{find_primitive, find_trope, ontology_entries};
use taleforge::services::arc::main_chain;
use taleforge::services::location_atmosphere;
use taleforge::store::{Collection, EdgeType, PayloadFilter, VectorStore};

const KITCHEN: &str = "The Knave crept into the kitchen. The Knave slashed at the Queen with his sword. \
                       Cold mist hung over the kitchen.";

fn melee_text() -> String {
    find_primitive("melee_attack").unwrap().semantic_text()
}

fn kitchen_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .reply(
            "segment",
            segments(vec![BoundaryBuilder::new(0, "Kitchen raid").at("the kitchen")]),
        )
        .reply("cast", cast(&[("Knave", "agent"), ("Queen", "agent")]))
        .reply(
            "beats",
            beats(vec![BeatBuilder::new("The Knave attacks the Queen")
                .description("The Knave attacks the Queen with his sword.")
                .quote("The Knave slashed at the Queen with his sword.")
                .archetype("conflict_physical")
                .participant("Knave", "agent")
                .participant("Queen", "agent")]),
        )
        .reply("resolve_identity", json!({ "selected_id": null }))
        .reply(
            "actions",
            actions(vec![
                ActionBuilder::new("Knave", "said"),
                ActionBuilder::new("Knave", "slashed at")
                    .target("Queen", "agent")
                    .quote("The Knave slashed at the Queen with his sword."),
            ]),
        )
        .pick_candidate("classify_mechanic", "melee attack")
        .reply("vibes", vibes(&[("Cold mist hung over the kitchen", "decay")]))
}

#[tokio::test]
async fn test_registries_indexed_before_first_document() {
    let world = TestWorld::new(kitchen_llm(), HashEmbedding::new());
    let pipeline = world.pipeline(test_config());

    let indexed = pipeline.index_registries(false).await.unwrap();
    assert_eq!(indexed, ontology_entries().len());
    assert_eq!(world.vectors.len(Collection::OntologyStatic), indexed);

    // Up to date: nothing re-embedded.
    let calls = world.embedder.calls();
    assert_eq!(pipeline.index_registries(false).await.unwrap(), 0);
    assert_eq!(world.embedder.calls(), calls);

    assert_eq!(pipeline.index_registries(true).await.unwrap(), indexed);
}

#[tokio::test]
async fn test_action_becomes_verb_bound_to_primitive() {
    let world = TestWorld::new(
        kitchen_llm(),
        HashEmbedding::new().equate("slashed", melee_text()),
    );
    let pipeline = world.pipeline(test_config());

    let report = pipeline.run("kitchen", KITCHEN).await.unwrap();
    assert_eq!(report.verbs, 1);
    assert_eq!(report.episodes[0].verbs, 1);
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let verbs = world.nodes("Verb").await;
    assert_eq!(verbs.len(), 1);
    let verb = &verbs[0];
    assert!(verb.has_label("melee_attack"));
    assert_eq!(verb.properties["phrase"], json!("slashed at"));

    let knave = world.node_named("Molecule", "Knave").await.unwrap();
    let queen = world.node_named("Molecule", "Queen").await.unwrap();
    let event = world
        .node_named("Event", "The Knave attacks the Queen")
        .await
        .unwrap();

    let from_verb = |edges: Vec<taleforge::store::EdgeRecord>| {
        edges
            .into_iter()
            .filter(|e| e.from_id == verb.id)
            .map(|e| e.to_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(from_verb(world.edges(EdgeType::PerformedBy).await), vec![knave.id.clone()]);
    assert_eq!(from_verb(world.edges(EdgeType::Targets).await), vec![queen.id.clone()]);
    assert_eq!(from_verb(world.edges(EdgeType::OccursIn).await), vec![event.id.clone()]);

    // Quote anchoring puts the verb inside its event.
    let span: taleforge::models::TextSpan =
        serde_json::from_value(verb.properties["span"].clone()).unwrap();
    assert_eq!(&KITCHEN[span.start..span.end], "The Knave slashed at the Queen with his sword.");
}

const GRIN: &str = "The Cheshire Cat grins. Later, the cat attacks the Queen.";

#[tokio::test]
async fn test_cheshire_cat_nickname_joins_the_same_molecule() {
    let llm = ScriptedLlm::new()
        .reply(
            "segment",
            segments(vec![BoundaryBuilder::new(0, "The grin").at("the garden")]),
        )
        .reply("cast", cast(&[("Cheshire Cat", "agent"), ("Queen", "agent")]))
        .reply(
            "beats",
            beats(vec![
                BeatBuilder::new("The Cheshire Cat grins")
                    .description("The Cheshire Cat grins.")
                    .quote("The Cheshire Cat grins.")
                    .participant("Cheshire Cat", "agent"),
                BeatBuilder::new("The cat attacks the Queen")
                    .description("The cat attacks the Queen.")
                    .quote("Later, the cat attacks the Queen.")
                    .archetype("conflict_physical")
                    .participant("the cat", "agent")
                    .participant("Queen", "agent"),
            ]),
        )
        .pick_candidate("resolve_identity", "cheshire")
        .reply(
            "actions",
            actions(vec![ActionBuilder::new("the cat", "attacks")
                .target("Queen", "agent")
                .quote("the cat attacks the Queen")]),
        )
        .pick_candidate("classify_mechanic", "melee attack")
        .reply("vibes", empty("snippets"));
    let world = TestWorld::new(llm, HashEmbedding::new().equate("attacks", melee_text()));
    let pipeline = world.pipeline(test_config());

    let report = pipeline.run("grin", GRIN).await.unwrap();
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    // "the cat" is adjudicated onto the Cheshire Cat and learned as an alias.
    let agents: Vec<_> = world
        .nodes("Molecule")
        .await
        .into_iter()
        .filter(|n| n.has_label("agent"))
        .collect();
    assert_eq!(agents.len(), 2);
    let cat = world.node_named("Molecule", "Cheshire Cat").await.unwrap();
    let queen = world.node_named("Molecule", "Queen").await.unwrap();
    let aliases = cat.properties["aliases"].as_array().unwrap();
    assert!(aliases.contains(&json!("cat")));

    let verbs = world.nodes("Verb").await;
    assert_eq!(verbs.len(), 1);
    let verb = &verbs[0];
    assert!(verb.has_label("melee_attack"));
    let from_verb = |edges: Vec<taleforge::store::EdgeRecord>| {
        edges
            .into_iter()
            .filter(|e| e.from_id == verb.id)
            .map(|e| e.to_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(from_verb(world.edges(EdgeType::PerformedBy).await), vec![cat.id.clone()]);
    assert_eq!(from_verb(world.edges(EdgeType::Targets).await), vec![queen.id.clone()]);

    let chain = main_chain(world.graph.as_ref(), "grin").await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(world.nodes("Event").await.len(), 2);
    let next = world.edges(EdgeType::Next).await;
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].from_id, chain[0].id.as_str());
    assert_eq!(next[0].to_id, chain[1].id.as_str());
}

#[tokio::test]
async fn test_atmosphere_attaches_to_location() {
    let world = TestWorld::new(
        kitchen_llm(),
        HashEmbedding::new().equate("slashed", melee_text()),
    );
    let pipeline = world.pipeline(test_config());

    let report = pipeline.run("mist", KITCHEN).await.unwrap();
    assert_eq!(report.vibes, 1);

    let kitchen = world.node_named("Molecule", "the kitchen").await.unwrap();
    let attached = world.edges(EdgeType::AttachedTo).await;
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].to_id, kitchen.id);

    let points = world
        .vectors
        .scroll(
            Collection::Vibes,
            Some(&PayloadFilter::eq("location_id", kitchen.id.as_str())),
        )
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].payload["mood"], json!("decay"));

    let policy = aggregation_policy(VibeAggregationConfig::LatestWins);
    let atmosphere = location_atmosphere(
        world.vectors.as_ref(),
        &MoleculeId::from(kitchen.id.clone()),
        policy.as_ref(),
    )
    .await
    .unwrap()
    .expect("kitchen has an atmosphere");
    assert_eq!(atmosphere.mood, Mood::Decay);
    assert_eq!(atmosphere.samples, 1);

    // The report reads the same aggregate through the configured policy.
    let summary = report.episodes[0].atmosphere.as_ref().expect("atmosphere in report");
    assert_eq!(summary.mood, Mood::Decay);
    assert_eq!(summary.samples, 1);
}

#[tokio::test]
async fn test_failing_micro_pass_keeps_skeleton() {
    let llm = kitchen_llm()
        .on("actions", |_| Ok(json!("not an object")))
        .on("vibes", |_| {
            Err(taleforge::TaleforgeError::service("llm", "quota exceeded"))
        });
    let world = TestWorld::new(llm, HashEmbedding::new());
    let pipeline = world.pipeline(test_config());

    let report = pipeline.run("skeleton", KITCHEN).await.unwrap();
    assert_eq!(report.events, 1);
    assert_eq!(report.verbs, 0);
    assert_eq!(report.vibes, 0);
    assert_eq!(world.nodes("Event").await.len(), 1);
    assert!(world.nodes("Verb").await.is_empty());
}

#[tokio::test]
async fn test_boundary_failure_falls_back_to_embedding_distance() {
    let llm = kitchen_llm().on("segment", |_| {
        Err(taleforge::TaleforgeError::service("llm", "model refused"))
    });
    let world = TestWorld::new(llm, HashEmbedding::new());
    let pipeline = world.pipeline(test_config());

    let report = pipeline.run("refused", KITCHEN).await.unwrap();
    assert!(!report.episodes.is_empty());
    assert_eq!(report.episodes[0].span.start, 0);
    assert_eq!(report.episodes.last().unwrap().span.end, KITCHEN.len());
    for pair in report.episodes.windows(2) {
        assert!(pair[0].span.end <= pair[1].span.start);
    }
}

#[tokio::test]
async fn test_empty_document_is_fatal() {
    let world = TestWorld::new(kitchen_llm(), HashEmbedding::new());
    let pipeline = world.pipeline(test_config());
    let err = pipeline.run("blank", "   \n\n  ").await.unwrap_err();
    assert!(matches!(err, taleforge::TaleforgeError::DocumentFatal(_)));
    assert!(world.nodes("Event").await.is_empty());
}

#[tokio::test]
async fn test_invalid_document_id_rejected() {
    let world = TestWorld::new(kitchen_llm(), HashEmbedding::new());
    let pipeline = world.pipeline(test_config());
    let err = pipeline.run("../etc/passwd", KITCHEN).await.unwrap_err();
    assert!(matches!(err, taleforge::TaleforgeError::Validation(_)));
    assert!(world.vectors.is_empty());
}

// ---------------------------------------------------------------------------
// Arcs
// ---------------------------------------------------------------------------

const REVENGE: [&str; 3] = [
    "The Duchess lost her kitchen to the Queen.",
    "The Duchess swore vengeance in exile.",
    "The Duchess returned and toppled the Queen.",
];

fn revenge_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .on("segment", |request| {
            let boundaries = request
                .prompt
                .lines()
                .filter_map(|line| line.strip_prefix('['))
                .filter_map(|rest| rest.split_once("] "))
                .filter_map(|(index, text)| {
                    let index = index.parse::<usize>().ok()?;
                    text.starts_with("The Duchess")
                        .then(|| BoundaryBuilder::new(index, "Duchess").at("the palace"))
                })
                .collect();
            Ok(segments(boundaries))
        })
        .reply("cast", cast(&[("Duchess", "agent"), ("Queen", "agent")]))
        .reply_by_prompt(
            "beats",
            vec![
                (
                    "lost her kitchen",
                    beats(vec![BeatBuilder::new("The Duchess is dispossessed")
                        .description("The Queen takes the Duchess's kitchen.")]),
                ),
                (
                    "swore vengeance",
                    beats(vec![BeatBuilder::new("The Duchess swears vengeance")
                        .description("In exile the Duchess swears vengeance.")]),
                ),
                (
                    "toppled",
                    beats(vec![BeatBuilder::new("The Duchess topples the Queen")
                        .description("The Duchess returns and topples the Queen.")]),
                ),
            ],
            empty("beats"),
        )
        .reply("resolve_identity", json!({ "selected_id": null }))
        .reply("actions", empty("actions"))
        .reply("vibes", empty("snippets"))
}

#[tokio::test]
async fn test_arc_detected_over_main_chain() {
    let trope = find_trope("arc_classic_revenge").unwrap();
    let world = TestWorld::new(
        revenge_llm(),
        HashEmbedding::new().equate("vengeance", trope.semantic_text()),
    );
    let mut config = test_config();
    config.stages.detect_arcs = true;
    config.arcs.window = 2;
    config.arcs.stride = 1;
    let pipeline = world.pipeline(config);

    let report = pipeline.run("revenge", &REVENGE.join("\n\n")).await.unwrap();
    assert_eq!(report.events, 3);

    let arc = report
        .arcs
        .iter()
        .find(|a| a.trope_id == "arc_classic_revenge")
        .expect("revenge arc detected");
    assert_eq!(arc.label, trope.name);

    let chain = main_chain(world.graph.as_ref(), "revenge").await.unwrap();
    let vow = chain
        .iter()
        .find(|e| e.title == "The Duchess swears vengeance")
        .unwrap();
    assert!(arc.events.contains(&vow.id));
    assert!(vow.arcs.iter().any(|label| label == trope.name));

    // Membership edges carry the position inside the arc.
    let part_of: Vec<_> = world
        .edges(EdgeType::PartOfArc)
        .await
        .into_iter()
        .filter(|e| e.to_id == arc.id.as_str())
        .collect();
    assert_eq!(part_of.len(), arc.events.len());
    assert!(world
        .edges(EdgeType::InstanceOf)
        .await
        .iter()
        .any(|e| e.from_id == arc.id.as_str() && e.to_id == "arc_classic_revenge"));

    // Re-tagging kept the stored event vector.
    let point = world
        .vectors
        .get_point(Collection::Chronicle, vow.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(point.vector, world.embedder.vector(&vow.semantic_text()));
}

#[tokio::test]
async fn test_arcs_skipped_when_disabled() {
    let trope = find_trope("arc_classic_revenge").unwrap();
    let world = TestWorld::new(
        revenge_llm(),
        HashEmbedding::new().equate("vengeance", trope.semantic_text()),
    );
    let report = world
        .pipeline(test_config())
        .run("no-arcs", &REVENGE.join("\n\n"))
        .await
        .unwrap();
    assert!(report.arcs.is_empty());
    assert!(world.nodes("ArcInstance").await.is_empty());
}
