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

//! Community detection over the entity graph.
//!
//! The structural skeleton: connected components over current facts, one
//! community node per component of two or more members, `MEMBER_OF`
//! membership edges. Naming uses the most-connected member; LM-based
//! summarization can be layered on by alternative implementations.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, instrument};

use crate::{
    edges::CommunityEdge,
    errors::EngineResult,
    nodes::CommunityNode,
    provider::GraphProvider,
};

/// Result of one community build pass.
#[derive(Debug, Default)]
pub struct CommunityBuild {
    pub communities: Vec<CommunityNode>,
    pub membership: Vec<CommunityEdge>,
}

/// Builds community nodes for one group.
#[async_trait]
pub trait CommunityBuilder: Send + Sync {
    async fn build(
        &self,
        provider: &dyn GraphProvider,
        group_id: &str,
    ) -> EngineResult<CommunityBuild>;
}

/// Connected components by breadth-first traversal over an adjacency map.
/// Iteration order is sorted so the result is deterministic.
fn connected_components(
    node_count: usize,
    adjacency: &HashMap<usize, HashSet<usize>>,
) -> Vec<Vec<usize>> {
    let mut visited = HashSet::new();
    let mut components = Vec::new();

    for start in 0..node_count {
        if visited.contains(&start) {
            continue;
        }

        let mut queue = VecDeque::new();
        let mut component = Vec::new();

        visited.insert(start);
        queue.push_back(start);

        while let Some(index) = queue.pop_front() {
            component.push(index);
            if let Some(neighbors) = adjacency.get(&index) {
                let mut neighbor_ids: Vec<usize> = neighbors.iter().copied().collect();
                neighbor_ids.sort_unstable();

                for neighbor in neighbor_ids {
                    if visited.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    components
}

/// Connected-component community builder.
#[derive(Debug, Default)]
pub struct ConnectedComponentBuilder;

#[async_trait]
impl CommunityBuilder for ConnectedComponentBuilder {
    #[instrument(skip_all, fields(group_id = %group_id))]
    async fn build(
        &self,
        provider: &dyn GraphProvider,
        group_id: &str,
    ) -> EngineResult<CommunityBuild> {
        let nodes = provider.get_entity_nodes(group_id).await?;
        let edges = provider.get_entity_edges(group_id).await?;

        if nodes.is_empty() {
            return Ok(CommunityBuild::default());
        }

        let index_of: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.uuid(), i))
            .collect();

        let mut adjacency: HashMap<usize, HashSet<usize>> = HashMap::new();
        let mut degree = vec![0usize; nodes.len()];
        for edge in edges.iter().filter(|e| e.is_current()) {
            let (Some(&a), Some(&b)) = (
                index_of.get(edge.source_node_uuid()),
                index_of.get(edge.target_node_uuid()),
            ) else {
                continue;
            };
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
            degree[a] += 1;
            degree[b] += 1;
        }

        let mut build = CommunityBuild::default();
        for members in connected_components(nodes.len(), &adjacency) {
            if members.len() < 2 {
                continue;
            }
            // The most-connected member names the community.
            let anchor = members
                .iter()
                .copied()
                .max_by_key(|&i| degree[i])
                .unwrap_or(members[0]);
            let member_names: Vec<&str> =
                members.iter().map(|&i| nodes[i].name()).collect();

            let community = CommunityNode::new(
                format!("Community: {}", nodes[anchor].name()),
                group_id.to_string(),
                member_names.join(", "),
            );
            debug!(
                "community {} with {} members",
                community.base.name,
                members.len()
            );
            for &member in &members {
                build.membership.push(CommunityEdge::new(
                    group_id.to_string(),
                    nodes[member].uuid().to_string(),
                    community.uuid().to_string(),
                ));
            }
            build.communities.push(community);
        }

        Ok(build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        edges::EntityEdge,
        helpers::utc_now,
        nodes::EntityNode,
        provider::EmbeddedGraphStore,
    };

    async fn seed(store: &EmbeddedGraphStore, names: &[&str]) -> Vec<EntityNode> {
        let mut nodes = Vec::new();
        for name in names {
            let node = EntityNode::new(name.to_string(), "g".to_string(), String::new());
            store.upsert_entity_node(&node).await.unwrap();
            nodes.push(node);
        }
        nodes
    }

    async fn connect(store: &EmbeddedGraphStore, a: &EntityNode, b: &EntityNode) {
        let edge = EntityEdge::new(
            "g".to_string(),
            a.uuid().to_string(),
            b.uuid().to_string(),
            "knows".to_string(),
            format!("{} knows {}", a.name(), b.name()),
            utc_now(),
        );
        store.upsert_entity_edge(&edge).await.unwrap();
    }

    #[test]
    fn test_connected_components_partition() {
        let mut adjacency: HashMap<usize, HashSet<usize>> = HashMap::new();
        adjacency.entry(0).or_default().insert(1);
        adjacency.entry(1).or_default().insert(0);
        adjacency.entry(2).or_default().insert(3);
        adjacency.entry(3).or_default().insert(2);

        let components = connected_components(5, &adjacency);
        assert_eq!(components, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn test_two_components() {
        let store = EmbeddedGraphStore::new();
        let nodes = seed(&store, &["A", "B", "C", "D", "E"]).await;
        connect(&store, &nodes[0], &nodes[1]).await;
        connect(&store, &nodes[1], &nodes[2]).await;
        connect(&store, &nodes[3], &nodes[4]).await;

        let build = ConnectedComponentBuilder
            .build(&store, "g")
            .await
            .unwrap();

        assert_eq!(build.communities.len(), 2);
        assert_eq!(build.membership.len(), 5);
        let sizes: Vec<usize> = {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for edge in &build.membership {
                *counts.entry(edge.community_uuid()).or_default() += 1;
            }
            let mut sizes: Vec<usize> = counts.into_values().collect();
            sizes.sort();
            sizes
        };
        assert_eq!(sizes, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_singletons_form_no_community() {
        let store = EmbeddedGraphStore::new();
        seed(&store, &["Lonely"]).await;

        let build = ConnectedComponentBuilder
            .build(&store, "g")
            .await
            .unwrap();
        assert!(build.communities.is_empty());
        assert!(build.membership.is_empty());
    }

    #[tokio::test]
    async fn test_anchor_is_most_connected() {
        let store = EmbeddedGraphStore::new();
        let nodes = seed(&store, &["Hub", "S1", "S2", "S3"]).await;
        connect(&store, &nodes[0], &nodes[1]).await;
        connect(&store, &nodes[0], &nodes[2]).await;
        connect(&store, &nodes[0], &nodes[3]).await;

        let build = ConnectedComponentBuilder
            .build(&store, "g")
            .await
            .unwrap();
        assert_eq!(build.communities.len(), 1);
        assert_eq!(build.communities[0].base.name, "Community: Hub");
    }
}
