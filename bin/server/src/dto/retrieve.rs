use serde::{Deserialize, Serialize};
use validator::Validate;

use epigraph_core::{EntityEdge, EntityNode, SearchResults};

/// Search request over one group
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1))]
    pub group_id: String,
    #[validate(length(min = 1))]
    pub query: String,
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    pub include_edges: Option<bool>,
    pub center_node_uuid: Option<String>,
    pub center_node_distance_weight: Option<f64>,
    /// rrf | none
    pub rerank: Option<String>,
    /// Subsets of {bm25, cosine}
    pub node_search_methods: Option<Vec<String>>,
    pub edge_search_methods: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ScoredNode {
    pub node: EntityNode,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct ScoredEdge {
    pub edge: EntityEdge,
    pub score: f64,
}

/// Ranked search results
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub nodes: Vec<ScoredNode>,
    pub edges: Vec<ScoredEdge>,
}

impl From<SearchResults> for SearchResponse {
    fn from(results: SearchResults) -> Self {
        Self {
            nodes: results
                .nodes
                .into_iter()
                .map(|r| ScoredNode {
                    node: r.item,
                    score: r.score,
                })
                .collect(),
            edges: results
                .edges
                .into_iter()
                .map(|r| ScoredEdge {
                    edge: r.item,
                    score: r.score,
                })
                .collect(),
        }
    }
}
