//! Hybrid-search scenarios over a graph populated through the full
//! ingestion pipeline.

mod common;

use epigraph_core::{
    AddEpisodeOptions, EpisodeInput, EpisodeSource, Rerank, SearchConfig, SearchMethod,
};

use common::{engine_with, workplace_lm};

async fn populated_engine() -> epigraph_core::Engine {
    let (_, engine) = engine_with(workplace_lm());
    let options = AddEpisodeOptions::default();

    for (uuid, content, time) in [
        ("ep1", "Alice works at Acme.", "2024-01-01T00:00:00Z"),
        (
            "ep2",
            "Alice left Acme and joined Globex.",
            "2024-06-01T00:00:00Z",
        ),
    ] {
        let input = EpisodeInput::new(uuid, content, "g1")
            .with_uuid(uuid)
            .with_source(EpisodeSource::Text)
            .with_reference_time(time.parse().unwrap());
        engine.add_episode(input, &options).await.unwrap();
    }
    engine
}

#[tokio::test]
async fn current_fact_outranks_expired_fact() {
    let engine = populated_engine().await;
    let config = SearchConfig {
        limit: 5,
        ..Default::default()
    };

    let results = engine
        .search("Where does Alice work?", "g1", &config)
        .await
        .unwrap();

    // Both employment facts surface; the current one is on top.
    assert_eq!(results.edges.len(), 2);
    assert_eq!(results.edges[0].item.fact, "Alice works at Globex.");
    assert!(results.edges[0].item.is_current());
    assert_eq!(results.edges[1].item.fact, "Alice works at Acme.");
    assert!(!results.edges[1].item.is_current());
    assert!(results.edges[0].score > results.edges[1].score);

    // All three entities appear in the node results.
    let names: std::collections::HashSet<&str> =
        results.nodes.iter().map(|r| r.item.name()).collect();
    assert!(names.contains("Alice"));
    assert!(names.contains("Acme"));
    assert!(names.contains("Globex"));
}

#[tokio::test]
async fn include_edges_false_returns_nodes_only() {
    let engine = populated_engine().await;
    let config = SearchConfig {
        include_edges: false,
        ..Default::default()
    };

    let results = engine.search("Alice", "g1", &config).await.unwrap();
    assert!(results.edges.is_empty());
    assert!(!results.nodes.is_empty());
}

#[tokio::test]
async fn limit_truncates_results() {
    let engine = populated_engine().await;
    let config = SearchConfig {
        limit: 1,
        ..Default::default()
    };

    let results = engine.search("Alice", "g1", &config).await.unwrap();
    assert!(results.nodes.len() <= 1);
    assert!(results.edges.len() <= 1);
}

#[tokio::test]
async fn min_score_filters_weak_hits() {
    let engine = populated_engine().await;
    let config = SearchConfig {
        min_score: f64::MAX,
        ..Default::default()
    };

    let results = engine.search("Alice", "g1", &config).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn bm25_only_search_works_without_vectors() {
    let engine = populated_engine().await;
    let config = SearchConfig {
        node_search_methods: vec![SearchMethod::Bm25],
        edge_search_methods: vec![SearchMethod::Bm25],
        ..Default::default()
    };

    let results = engine.search("Globex", "g1", &config).await.unwrap();
    assert!(results
        .nodes
        .iter()
        .any(|r| r.item.name() == "Globex"));
}

#[tokio::test]
async fn rerank_none_keeps_raw_scores() {
    let engine = populated_engine().await;
    let config = SearchConfig {
        rerank: Rerank::None,
        ..Default::default()
    };

    let results = engine.search("Alice", "g1", &config).await.unwrap();
    assert!(!results.nodes.is_empty());
    // Raw BM25/cosine scores, not 1/(k+rank) sums.
    assert!(results.nodes[0].score > 1.0 / 61.0 * 4.0);
}

#[tokio::test]
async fn center_node_reranking_prefers_neighbors() {
    let engine = populated_engine().await;

    // Find Alice to use as the center.
    let base = engine
        .search("Alice", "g1", &SearchConfig::default())
        .await
        .unwrap();
    let alice = base
        .nodes
        .iter()
        .find(|r| r.item.name() == "Alice")
        .expect("alice present");

    let config = SearchConfig {
        center_node_uuid: Some(alice.item.uuid().to_string()),
        center_node_distance_weight: 0.9,
        ..Default::default()
    };
    let results = engine.search("Alice", "g1", &config).await.unwrap();

    // Direct neighbors of the center outrank everything unreachable; with
    // this graph every returned node is within one hop, so scores carry a
    // large proximity component.
    for result in &results.nodes {
        assert!(result.score > 0.0);
    }

    let empty_group = engine
        .search("Alice", "missing-group", &config)
        .await
        .unwrap();
    assert!(empty_group.is_empty());
}

#[tokio::test]
async fn search_respects_group_isolation() {
    let engine = populated_engine().await;

    let results = engine
        .search("Alice", "other-group", &SearchConfig::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn empty_query_returns_nothing() {
    let engine = populated_engine().await;

    let results = engine
        .search("   ", "g1", &SearchConfig::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}
