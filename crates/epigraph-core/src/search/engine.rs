/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::collections::HashMap;
use tracing::{debug, instrument};

use super::config::{
    Rerank, SearchConfig, SearchMethod, SearchResult, SearchResults, MAX_SEARCH_DEPTH,
};
use crate::{
    edges::EntityEdge,
    embedder::EmbedderClient,
    errors::EngineResult,
    nodes::EntityNode,
    provider::GraphProvider,
};

/// Reciprocal-rank fusion constant.
pub const RRF_K: f64 = 60.0;

/// Fused score multiplier for superseded facts, so a current fact outranks
/// an expired one of equal textual relevance.
const EXPIRED_EDGE_DEMOTION: f64 = 0.5;

/// Per-method candidate pool, before fusion and truncation.
fn pool_size(limit: usize) -> usize {
    (limit * 2).max(10)
}

/// Hybrid search over one group.
#[instrument(skip_all, fields(group_id = %group_id, query = %query))]
pub async fn search(
    provider: &dyn GraphProvider,
    embedder: Option<&dyn EmbedderClient>,
    query: &str,
    group_id: &str,
    config: &SearchConfig,
) -> EngineResult<SearchResults> {
    if query.trim().is_empty() || config.limit == 0 {
        return Ok(SearchResults::default());
    }

    let wants_cosine = config.node_search_methods.contains(&SearchMethod::Cosine)
        || (config.include_edges && config.edge_search_methods.contains(&SearchMethod::Cosine));

    // One query embedding for every cosine channel.
    let query_vector = match (embedder, wants_cosine) {
        (Some(embedder), true) => match embedder.create(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                debug!("query embedding failed, falling back to bm25 only: {}", e);
                None
            }
        },
        _ => None,
    };

    let pool = pool_size(config.limit);

    let node_bm25 = async {
        if config.node_search_methods.contains(&SearchMethod::Bm25) {
            provider.search_nodes_fulltext(query, group_id, pool).await
        } else {
            Ok(Vec::new())
        }
    };
    let node_cosine = async {
        match (&query_vector, config.node_search_methods.contains(&SearchMethod::Cosine)) {
            (Some(vector), true) => {
                provider.search_nodes_by_embedding(vector, group_id, pool).await
            }
            _ => Ok(Vec::new()),
        }
    };
    let edge_bm25 = async {
        if config.include_edges && config.edge_search_methods.contains(&SearchMethod::Bm25) {
            provider.search_edges_fulltext(query, group_id, pool).await
        } else {
            Ok(Vec::new())
        }
    };
    let edge_cosine = async {
        match (&query_vector, config.include_edges
            && config.edge_search_methods.contains(&SearchMethod::Cosine))
        {
            (Some(vector), true) => {
                provider.search_edges_by_embedding(vector, group_id, pool).await
            }
            _ => Ok(Vec::new()),
        }
    };

    let (node_bm25, node_cosine, edge_bm25, edge_cosine) =
        futures::join!(node_bm25, node_cosine, edge_bm25, edge_cosine);
    let (node_bm25, node_cosine) = (node_bm25?, node_cosine?);
    let (edge_bm25, edge_cosine) = (edge_bm25?, edge_cosine?);

    let mut nodes = fuse(
        vec![node_bm25, node_cosine],
        config.rerank,
        |node: &EntityNode| node.uuid().to_string(),
    );
    let mut edges = fuse(
        vec![edge_bm25, edge_cosine],
        config.rerank,
        |edge: &EntityEdge| edge.uuid().to_string(),
    );

    // Current facts outrank superseded ones at equal relevance.
    for result in &mut edges {
        if !result.item.is_current() {
            result.score *= EXPIRED_EDGE_DEMOTION;
        }
    }
    sort_by_score(&mut edges);

    if let Some(center_uuid) = &config.center_node_uuid {
        let distances = distances_from(provider, center_uuid, group_id).await?;
        let weight = config.center_node_distance_weight.clamp(0.0, 1.0);
        for result in &mut nodes {
            let proximity = proximity_of(&distances, result.item.uuid());
            result.score = (1.0 - weight) * result.score + weight * proximity;
        }
        for result in &mut edges {
            let proximity = proximity_of(&distances, result.item.source_node_uuid())
                .max(proximity_of(&distances, result.item.target_node_uuid()));
            result.score = (1.0 - weight) * result.score + weight * proximity;
        }
        sort_by_score(&mut nodes);
        sort_by_score(&mut edges);
    }

    nodes.retain(|r| r.score >= config.min_score);
    edges.retain(|r| r.score >= config.min_score);
    nodes.truncate(config.limit);
    edges.truncate(config.limit);

    Ok(SearchResults { nodes, edges })
}

/// Fuse ranked candidate lists into one ranking.
///
/// With [`Rerank::Rrf`], each item scores `Σ 1/(k + rank)` over the lists
/// that contain it (ranks are 1-based; absence contributes 0). With
/// [`Rerank::None`], items keep their best raw per-method score and are
/// merely deduplicated.
fn fuse<T: Clone>(
    lists: Vec<Vec<(T, f64)>>,
    rerank: Rerank,
    key_of: impl Fn(&T) -> String,
) -> Vec<SearchResult<T>> {
    let mut items: HashMap<String, T> = HashMap::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in &lists {
        for (rank, (item, raw_score)) in list.iter().enumerate() {
            let key = key_of(item);
            items.entry(key.clone()).or_insert_with(|| item.clone());
            let entry = scores.entry(key).or_insert(0.0);
            match rerank {
                Rerank::Rrf => *entry += 1.0 / (RRF_K + (rank + 1) as f64),
                Rerank::None => *entry = entry.max(*raw_score),
            }
        }
    }

    let mut fused: Vec<SearchResult<T>> = scores
        .into_iter()
        .filter_map(|(key, score)| {
            items.remove(&key).map(|item| SearchResult { item, score })
        })
        .collect();
    sort_by_score(&mut fused);
    fused
}

fn sort_by_score<T>(results: &mut [SearchResult<T>]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

/// BFS distances (in logical hops) from the center node, bounded by
/// [`MAX_SEARCH_DEPTH`]. Unreachable nodes are absent.
async fn distances_from(
    provider: &dyn GraphProvider,
    center_uuid: &str,
    group_id: &str,
) -> EngineResult<HashMap<String, usize>> {
    let mut distances = HashMap::new();
    distances.insert(center_uuid.to_string(), 0);
    for radius in 1..=MAX_SEARCH_DEPTH {
        let ring = provider.get_neighbors(center_uuid, group_id, radius).await?;
        for node in ring {
            distances.entry(node.uuid().to_string()).or_insert(radius);
        }
    }
    Ok(distances)
}

/// `1/(1+d)` for reachable nodes, 0 otherwise.
fn proximity_of(distances: &HashMap<String, usize>, uuid: &str) -> f64 {
    match distances.get(uuid) {
        Some(distance) => 1.0 / (1.0 + *distance as f64),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> EntityNode {
        EntityNode::new(name.to_string(), "g".to_string(), String::new())
    }

    #[test]
    fn test_rrf_prefers_items_in_both_lists() {
        let shared = named("shared");
        let only_a = named("only_a");
        let only_b = named("only_b");

        let list_a = vec![(only_a.clone(), 9.0), (shared.clone(), 5.0)];
        let list_b = vec![(shared.clone(), 0.8), (only_b.clone(), 0.7)];

        let fused = fuse(vec![list_a, list_b], Rerank::Rrf, |n| n.uuid().to_string());

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].item.uuid(), shared.uuid());
        // 1/61 + 1/62 for shared; 1/61 for the singletons.
        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rerank_none_keeps_best_raw_score() {
        let item = named("n");
        let list_a = vec![(item.clone(), 2.0)];
        let list_b = vec![(item.clone(), 7.0)];

        let fused = fuse(vec![list_a, list_b], Rerank::None, |n| n.uuid().to_string());
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_proximity_decays_with_distance() {
        let mut distances = HashMap::new();
        distances.insert("near".to_string(), 1);
        distances.insert("far".to_string(), 3);

        assert!(proximity_of(&distances, "near") > proximity_of(&distances, "far"));
        assert_eq!(proximity_of(&distances, "unreachable"), 0.0);
    }
}
