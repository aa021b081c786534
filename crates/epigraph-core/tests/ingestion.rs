//! End-to-end ingestion scenarios against the embedded provider, driven
//! by the rule-based fake LM and the deterministic embedder.

mod common;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use epigraph_core::{
    AddEpisodeOptions, EngineError, EpisodeInput, EpisodeSource, GraphProvider,
};

use common::{engine_over, engine_with, workplace_lm, FakeLm, FlakyProvider};

fn at(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("test datetime")
}

fn episode(uuid: &str, content: &str, reference_time: &str) -> EpisodeInput {
    EpisodeInput::new(uuid, content, "g1")
        .with_uuid(uuid)
        .with_source(EpisodeSource::Text)
        .with_reference_time(at(reference_time))
}

#[tokio::test]
async fn single_chunk_creation() {
    let (provider, engine) = engine_with(workplace_lm());
    let options = AddEpisodeOptions::default();

    let results = engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(results.nodes.len(), 2);
    let mut names: Vec<&str> = results.nodes.iter().map(|n| n.name()).collect();
    names.sort();
    assert_eq!(names, vec!["Acme", "Alice"]);

    assert_eq!(results.edges.len(), 1);
    let edge = &results.edges[0];
    assert_eq!(edge.name, "works_at");
    assert_eq!(edge.valid_at, at("2024-01-01T00:00:00Z"));
    assert_eq!(edge.expired_at, None);
    assert_eq!(edge.episodes, vec!["ep1"]);

    assert_eq!(results.episodic_edges.len(), 2);
    assert!(results.invalidated_edges.is_empty());
    assert_eq!(results.skipped_chunks, 0);
    assert!(results.token_usage.total_tokens > 0);

    // The backend agrees with the summary.
    assert_eq!(provider.get_entity_nodes("g1").await.unwrap().len(), 2);
    assert_eq!(provider.get_entity_edges("g1").await.unwrap().len(), 1);
    let stored = provider.get_episodic_node("ep1", "g1").await.unwrap();
    assert_eq!(stored.entity_edges, vec![edge.uuid().to_string()]);
}

#[tokio::test]
async fn deduplication_on_reingest() {
    let (provider, engine) = engine_with(workplace_lm());
    let options = AddEpisodeOptions::default();

    engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();
    let results = engine
        .add_episode(
            episode("ep1b", "Alice works at Acme.", "2024-01-02T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();

    // Zero new entity nodes, zero new edges.
    assert_eq!(provider.get_entity_nodes("g1").await.unwrap().len(), 2);
    let edges = provider.get_entity_edges("g1").await.unwrap();
    assert_eq!(edges.len(), 1);

    // Provenance accumulated on the one existing fact.
    assert!(edges[0].episodes.contains(&"ep1".to_string()));
    assert!(edges[0].episodes.contains(&"ep1b".to_string()));
    assert!(edges[0].is_current());

    // The re-ingest still mentions both entities.
    assert_eq!(results.episodic_edges.len(), 2);
    assert!(results.invalidated_edges.is_empty());
}

#[tokio::test]
async fn temporal_invalidation() {
    let (provider, engine) = engine_with(workplace_lm());
    let options = AddEpisodeOptions::default();

    engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();
    let results = engine
        .add_episode(
            episode(
                "ep2",
                "Alice left Acme and joined Globex.",
                "2024-06-01T00:00:00Z",
            ),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(results.edges.len(), 1);
    let globex_edge = &results.edges[0];
    assert_eq!(globex_edge.name, "works_at");
    assert_eq!(globex_edge.valid_at, at("2024-06-01T00:00:00Z"));
    assert!(globex_edge.is_current());

    assert_eq!(results.invalidated_edges.len(), 1);
    let acme_edge = &results.invalidated_edges[0];
    assert_eq!(acme_edge.fact, "Alice works at Acme.");
    assert!(acme_edge.expired_at.is_some());
    assert_eq!(acme_edge.invalid_at, Some(at("2024-06-01T00:00:00Z")));
    assert!(acme_edge.temporal_bounds_ok());

    // Backend state: two facts total, exactly one current works_at from
    // Alice.
    let edges = provider.get_entity_edges("g1").await.unwrap();
    assert_eq!(edges.len(), 2);
    let current: Vec<_> = edges.iter().filter(|e| e.is_current()).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].fact, "Alice works at Globex.");
}

#[tokio::test]
async fn chunked_episode_collapses_entities_across_chunks() {
    let lm = Arc::new(workplace_lm());
    let provider = Arc::new(FlakyProvider::failing_edges_between(0));
    let engine = engine_over(provider.clone(), lm.clone());
    let options = AddEpisodeOptions {
        max_characters_per_chunk: 4000,
        ..Default::default()
    };

    let filler = "meadow larks drift over quiet evening fields without hurry. ";
    let part1 = format!("{}Alice joined the retreat.", filler.repeat(58));
    let part2 = format!("{}She works at Acme.", filler.repeat(58));
    let part3 = format!("{}Alice spoke at dinner.", filler.repeat(58));
    let content = format!("{}\n\n{}\n\n{}", part1, part2, part3);
    assert!(content.chars().count() > 9000);

    let results = engine
        .add_episode(episode("ep-long", &content, "2024-03-01T00:00:00Z"), &options)
        .await
        .unwrap();

    // Three chunks were extracted, in order.
    assert_eq!(lm.entity_calls.load(std::sync::atomic::Ordering::SeqCst), 3);

    // Alice from chunks 1 and 3 collapsed to one node; the chunk-2 edge
    // referencing her resolved against it.
    assert_eq!(results.nodes.len(), 2);
    assert_eq!(results.edges.len(), 1);
    let edge = &results.edges[0];
    let alice = results
        .nodes
        .iter()
        .find(|n| n.name() == "Alice")
        .expect("alice node");
    let acme = results
        .nodes
        .iter()
        .find(|n| n.name() == "Acme")
        .expect("acme node");
    assert_eq!(edge.source_node_uuid(), alice.uuid());
    assert_eq!(edge.target_node_uuid(), acme.uuid());
}

#[tokio::test]
async fn checkpoint_resume_after_transient_outage() {
    let lm = Arc::new(workplace_lm());
    let provider = Arc::new(FlakyProvider::failing_edges_between(1));
    let engine = engine_over(provider.clone(), lm.clone());
    let options = AddEpisodeOptions::default();

    let results = engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();

    // Identical to an unfailed run.
    assert_eq!(results.nodes.len(), 2);
    assert_eq!(results.edges.len(), 1);
    assert_eq!(results.episodic_edges.len(), 2);
    assert_eq!(provider.get_entity_edges("g1").await.unwrap().len(), 1);

    // The second attempt resumed past extraction instead of replaying it.
    assert_eq!(lm.entity_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(lm.edge_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_exhaust_on_persistent_outage() {
    let lm = Arc::new(workplace_lm());
    let provider = Arc::new(FlakyProvider::failing_edges_between(100));
    let engine = engine_over(provider, lm);

    let err = engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &AddEpisodeOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::RetriesExhausted { .. }));
}

#[tokio::test]
async fn empty_content_is_invalid_input() {
    let (_, engine) = engine_with(workplace_lm());

    let err = engine
        .add_episode(
            episode("ep1", "   ", "2024-01-01T00:00:00Z"),
            &AddEpisodeOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InputInvalid(_)));
}

#[tokio::test]
async fn chunk_without_entities_still_persists_episode() {
    let (provider, engine) = engine_with(FakeLm::with_lexicon(&[]));

    let results = engine
        .add_episode(
            episode("ep1", "Nothing notable happened today.", "2024-01-01T00:00:00Z"),
            &AddEpisodeOptions::default(),
        )
        .await
        .unwrap();

    assert!(results.nodes.is_empty());
    assert!(results.edges.is_empty());
    assert_eq!(results.skipped_chunks, 1);

    // The episode node itself is always persisted.
    assert!(provider.get_episodic_node("ep1", "g1").await.is_ok());
    assert!(provider.get_entity_nodes("g1").await.unwrap().is_empty());
}

#[tokio::test]
async fn append_extracts_only_new_content() {
    let lm = Arc::new(workplace_lm());
    let provider = Arc::new(FlakyProvider::failing_edges_between(0));
    let engine = engine_over(provider.clone(), lm.clone());
    let options = AddEpisodeOptions::default();

    engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();
    let entity_calls_before = lm.entity_calls.load(std::sync::atomic::Ordering::SeqCst);

    let results = engine
        .add_to_episode("ep1", "g1", "Alice left Acme and joined Globex.", &options)
        .await
        .unwrap();

    // Extraction ran once more, over the appended content only.
    assert_eq!(
        lm.entity_calls.load(std::sync::atomic::Ordering::SeqCst),
        entity_calls_before + 1
    );

    // The appended fact landed and the original provenance survived.
    let stored = provider.get_episodic_node("ep1", "g1").await.unwrap();
    assert!(stored.content.contains("Alice works at Acme."));
    assert!(stored.content.contains("joined Globex"));
    assert_eq!(stored.entity_edges.len(), 2);

    assert_eq!(results.invalidated_edges.len(), 1);
    let edges = provider.get_entity_edges("g1").await.unwrap();
    let current: Vec<_> = edges.iter().filter(|e| e.is_current()).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].fact, "Alice works at Globex.");
}

#[tokio::test]
async fn update_communities_builds_membership() {
    let (provider, engine) = engine_with(workplace_lm());
    let options = AddEpisodeOptions {
        update_communities: true,
        ..Default::default()
    };

    let results = engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(results.communities.len(), 1);
    assert_eq!(results.community_edges.len(), 2);
    assert_eq!(provider.get_community_nodes("g1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn clear_group_removes_everything() {
    let (provider, engine) = engine_with(workplace_lm());

    engine
        .add_episode(
            episode("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
            &AddEpisodeOptions::default(),
        )
        .await
        .unwrap();
    engine.clear_group("g1").await.unwrap();

    assert!(provider.get_entity_nodes("g1").await.unwrap().is_empty());
    assert!(provider.get_episodic_node("ep1", "g1").await.is_err());
}

#[tokio::test]
async fn bitemporal_invariants_hold_across_the_story() {
    let (provider, engine) = engine_with(workplace_lm());
    let options = AddEpisodeOptions::default();

    for (uuid, content, time) in [
        ("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
        ("ep1b", "Alice works at Acme.", "2024-02-01T00:00:00Z"),
        (
            "ep2",
            "Alice left Acme and joined Globex.",
            "2024-06-01T00:00:00Z",
        ),
    ] {
        engine
            .add_episode(episode(uuid, content, time), &options)
            .await
            .unwrap();
    }

    let edges = provider.get_entity_edges("g1").await.unwrap();
    for edge in &edges {
        // valid_at <= invalid_at whenever both are set.
        assert!(edge.temporal_bounds_ok(), "bounds violated on {}", edge.fact);
        // Provenance carries at least one episode.
        assert!(!edge.episodes.is_empty());
    }

    // At most one current edge per (source, target, name).
    let mut current_triples = std::collections::HashSet::new();
    for edge in edges.iter().filter(|e| e.is_current()) {
        let triple = (
            edge.source_node_uuid().to_string(),
            edge.target_node_uuid().to_string(),
            edge.name.clone(),
        );
        assert!(
            current_triples.insert(triple),
            "duplicate current fact: {}",
            edge.fact
        );
    }
}
