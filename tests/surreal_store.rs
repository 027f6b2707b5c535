//! SurrealDB store: node, edge and point round trips on an embedded database.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::builders::{cast, empty, segments, BeatBuilder, BoundaryBuilder};
use common::{test_config, HashEmbedding, ScriptedLlm, TestHarness};
use taleforge::services::{NormalizationOutcome, Pipeline};
use taleforge::store::{
    Collection, EdgeRecord, EdgeType, GraphPattern, GraphRow, GraphStore, NodeRecord, Payload,
    PayloadFilter, VectorPoint, VectorStore,
};

fn node(id: &str, labels: &[&str], name: &str) -> NodeRecord {
    let mut properties = Payload::new();
    properties.insert("name".into(), json!(name));
    NodeRecord {
        id: id.to_string(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        properties,
    }
}

fn point(id: &str, vector: Vec<f32>, doc_type: &str) -> VectorPoint {
    let mut payload = Payload::new();
    payload.insert("doc_type".into(), json!(doc_type));
    VectorPoint {
        id: id.to_string(),
        vector,
        payload,
    }
}

#[tokio::test]
async fn test_node_upsert_replaces_properties() {
    let harness = TestHarness::new().await;
    let store = harness.store();

    store
        .upsert_node(&node("mol-alice", &["Molecule", "agent"], "Alice"))
        .await
        .unwrap();
    store
        .upsert_node(&node("mol-alice", &["Molecule", "agent"], "Alice Liddell"))
        .await
        .unwrap();

    let stored = store.get_node("mol-alice").await.unwrap().unwrap();
    assert_eq!(stored.properties["name"], json!("Alice Liddell"));
    assert!(stored.has_label("agent"));

    let molecules = store
        .query(&GraphPattern::NodesByLabel("Molecule".into()))
        .await
        .unwrap();
    assert_eq!(molecules.len(), 1);

    store.delete_node("mol-alice").await.unwrap();
    assert!(store.get_node("mol-alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_if_absent_claims_once() {
    let harness = TestHarness::new().await;
    let store = harness.store();
    let marker = node("normalization:chapter-1", &["Marker"], "marker");

    assert!(store.create_node_if_absent(&marker).await.unwrap());
    assert!(!store.create_node_if_absent(&marker).await.unwrap());
}

#[tokio::test]
async fn test_edges_are_unique_per_type_and_direction() {
    let harness = TestHarness::new().await;
    let store = harness.store();

    let next = EdgeRecord::new("evt-1", EdgeType::Next, "evt-2");
    store.upsert_edge(&next).await.unwrap();
    store.upsert_edge(&next).await.unwrap();
    store
        .upsert_edge(&EdgeRecord::new("evt-1", EdgeType::Involves, "mol-alice"))
        .await
        .unwrap();
    store
        .upsert_edge(&EdgeRecord::new("evt-3", EdgeType::Recalls, "evt-1"))
        .await
        .unwrap();

    let from: Vec<EdgeRecord> = store
        .query(&GraphPattern::EdgesFrom {
            from_id: "evt-1".into(),
            edge_type: None,
        })
        .await
        .unwrap()
        .into_iter()
        .filter_map(GraphRow::into_edge)
        .collect();
    assert_eq!(from.len(), 2);

    let recalled: Vec<EdgeRecord> = store
        .query(&GraphPattern::EdgesTo {
            to_id: "evt-1".into(),
            edge_type: Some(EdgeType::Recalls),
        })
        .await
        .unwrap()
        .into_iter()
        .filter_map(GraphRow::into_edge)
        .collect();
    assert_eq!(recalled.len(), 1);
    assert_eq!(recalled[0].from_id, "evt-3");

    let positioned =
        EdgeRecord::new("evt-2", EdgeType::PartOfArc, "arc-1").with_property("position", 1u64);
    store.upsert_edge(&positioned).await.unwrap();
    let part_of: Vec<EdgeRecord> = store
        .query(&GraphPattern::EdgesOfType(EdgeType::PartOfArc))
        .await
        .unwrap()
        .into_iter()
        .filter_map(GraphRow::into_edge)
        .collect();
    assert_eq!(part_of.len(), 1);
    assert_eq!(part_of[0].to_id, positioned.to_id);
    assert_eq!(part_of[0].properties["position"].as_u64(), Some(1));
}

#[tokio::test]
async fn test_rejects_unsafe_identifiers() {
    let harness = TestHarness::new().await;
    let store = harness.store();

    let err = store
        .upsert_node(&node("mol-x'; DELETE graph_node; --", &["Molecule"], "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, taleforge::TaleforgeError::Validation(_)));

    let filter = PayloadFilter::eq("doc_type = 1 OR true", "x");
    assert!(store
        .scroll(Collection::Molecules, Some(&filter))
        .await
        .is_err());
}

#[tokio::test]
async fn test_points_are_scoped_by_collection() {
    let harness = TestHarness::new().await;
    let store = harness.store();

    store
        .upsert_point(Collection::Molecules, &point("shared-id", vec![1.0, 0.0], "molecule"))
        .await
        .unwrap();
    store
        .upsert_point(Collection::Chronicle, &point("shared-id", vec![0.0, 1.0], "event"))
        .await
        .unwrap();

    let molecule = store
        .get_point(Collection::Molecules, "shared-id")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(molecule.vector, vec![1.0, 0.0]);

    store
        .delete_point(Collection::Molecules, "shared-id")
        .await
        .unwrap();
    assert!(store
        .get_point(Collection::Molecules, "shared-id")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get_point(Collection::Chronicle, "shared-id")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_search_ranks_by_cosine_with_filter() {
    let harness = TestHarness::new().await;
    let store = harness.store();

    for (id, vector, doc_type) in [
        ("melee_attack", vec![1.0, 0.0, 0.0], "primitive"),
        ("climb", vec![0.7, 0.7, 0.0], "primitive"),
        ("topo_vertical_stack", vec![1.0, 0.1, 0.0], "topology"),
        ("steal", vec![0.0, 0.0, 1.0], "primitive"),
    ] {
        store
            .upsert_point(Collection::OntologyStatic, &point(id, vector, doc_type))
            .await
            .unwrap();
    }

    let hits = store
        .search(
            Collection::OntologyStatic,
            &[1.0, 0.0, 0.0],
            2,
            Some(&PayloadFilter::eq("doc_type", "primitive")),
        )
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["melee_attack", "climb"]);
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!(hits[0].score >= hits[1].score);

    let topology = store
        .scroll(
            Collection::OntologyStatic,
            Some(&PayloadFilter::eq("doc_type", "topology")),
        )
        .await
        .unwrap();
    assert_eq!(topology.len(), 1);
}

#[tokio::test]
async fn test_pipeline_over_embedded_database() {
    let harness = TestHarness::new().await;
    let store = harness.store();
    let llm = ScriptedLlm::new()
        .reply(
            "segment",
            segments(vec![BoundaryBuilder::new(0, "Hall").at("the hall of doors")]),
        )
        .reply("cast", cast(&[("Alice", "agent")]))
        .reply(
            "beats",
            common::builders::beats(vec![BeatBuilder::new("Alice finds the key")
                .description("Alice finds a tiny golden key on the table.")
                .participant("Alice", "agent")]),
        )
        .reply("resolve_identity", json!({ "selected_id": null }))
        .reply("actions", empty("actions"))
        .reply("vibes", empty("snippets"));
    let pipeline = Pipeline::new(
        std::sync::Arc::new(llm),
        std::sync::Arc::new(HashEmbedding::new()),
        store.clone(),
        store.clone(),
        test_config(),
    );

    let text = "Alice found a tiny golden key on the glass table in the hall of doors.";
    let report = pipeline.run("hall", text).await.unwrap();
    assert_eq!(report.events, 1);
    assert!(report.is_clean(), "failures: {:?}", report.failures);

    let events = store
        .query(&GraphPattern::NodesByLabel("Event".into()))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let involves = store
        .query(&GraphPattern::EdgesOfType(EdgeType::Involves))
        .await
        .unwrap();
    assert_eq!(involves.len(), 1);

    let molecules = store
        .query(&GraphPattern::NodesByLabel("Molecule".into()))
        .await
        .unwrap()
        .len();

    // Same database, second run: the stored Molecules are reused and
    // rescaled, not duplicated.
    let again = pipeline.run("hall", text).await.unwrap();
    assert!(matches!(
        again.normalization,
        NormalizationOutcome::Normalized { molecules: n, .. } if n == molecules
    ));
    let after = store
        .query(&GraphPattern::NodesByLabel("Molecule".into()))
        .await
        .unwrap();
    assert_eq!(after.len(), molecules);
    assert_eq!(store.scroll(Collection::Molecules, None).await.unwrap().len(), molecules);
    assert!(harness.temp_path().exists());
}
