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

use serde::{Deserialize, Serialize};

use crate::{edges::EntityEdge, nodes::EntityNode};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_MIN_SCORE: f64 = 0.0;
pub const DEFAULT_CENTER_DISTANCE_WEIGHT: f64 = 0.3;
pub const MAX_SEARCH_DEPTH: usize = 3;

/// Retrieval channels available per item kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Bm25,
    Cosine,
}

/// How fused candidate lists are reranked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rerank {
    #[default]
    Rrf,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub limit: usize,
    pub min_score: f64,
    pub include_edges: bool,
    /// Rerank by graph distance from this node when set.
    pub center_node_uuid: Option<String>,
    pub center_node_distance_weight: f64,
    pub rerank: Rerank,
    pub node_search_methods: Vec<SearchMethod>,
    pub edge_search_methods: Vec<SearchMethod>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            min_score: DEFAULT_MIN_SCORE,
            include_edges: true,
            center_node_uuid: None,
            center_node_distance_weight: DEFAULT_CENTER_DISTANCE_WEIGHT,
            rerank: Rerank::Rrf,
            node_search_methods: vec![SearchMethod::Bm25, SearchMethod::Cosine],
            edge_search_methods: vec![SearchMethod::Bm25, SearchMethod::Cosine],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult<T> {
    pub item: T,
    pub score: f64,
}

/// Final ranked results; order is the ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults {
    pub nodes: Vec<SearchResult<EntityNode>>,
    pub edges: Vec<SearchResult<EntityEdge>>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_config_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(config.min_score, DEFAULT_MIN_SCORE);
        assert!(config.include_edges);
        assert_eq!(config.rerank, Rerank::Rrf);
        assert_eq!(
            config.node_search_methods,
            vec![SearchMethod::Bm25, SearchMethod::Cosine]
        );
    }

    #[test]
    fn test_search_results_empty() {
        assert!(SearchResults::default().is_empty());
    }
}
