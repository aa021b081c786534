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

//! Process-embedded analytical graph store.
//!
//! This backend cannot attach fulltext indices to edge properties, so an
//! `EntityEdge` is not stored as an edge at all: it becomes an internal
//! `RelatesTo` node carrying every edge property, linked to its endpoints
//! by two typed arcs `(source)-[:RELATES_TO]->(r)` and
//! `(r)-[:RELATES_TO]->(target)`. Every edge query here walks that
//! two-hop pattern; callers only ever see logical [`EntityEdge`] values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

use crate::{
    edges::{BaseEdge, CommunityEdge, EntityEdge, EpisodicEdge},
    errors::{ProviderError, ProviderResult},
    helpers::{cosine_similarity, tokenize},
    nodes::{CommunityNode, EntityNode, EpisodicNode},
    provider::GraphProvider,
};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// The edge-as-node record. Everything an `EntityEdge` carries lives on
/// this node; the endpoints live on the two arcs.
#[derive(Debug, Clone)]
struct RelatesTo {
    uuid: String,
    group_id: String,
    name: String,
    fact: String,
    fact_embedding: Option<Vec<f32>>,
    episodes: Vec<String>,
    created_at: DateTime<Utc>,
    valid_at: DateTime<Utc>,
    invalid_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    attributes: HashMap<String, serde_json::Value>,
}

impl RelatesTo {
    fn encode(edge: &EntityEdge) -> Self {
        Self {
            uuid: edge.base.uuid.clone(),
            group_id: edge.base.group_id.clone(),
            name: edge.name.clone(),
            fact: edge.fact.clone(),
            fact_embedding: edge.fact_embedding.clone(),
            episodes: edge.episodes.clone(),
            created_at: edge.base.created_at,
            valid_at: edge.valid_at,
            invalid_at: edge.invalid_at,
            expired_at: edge.expired_at,
            attributes: edge.attributes.clone(),
        }
    }

    fn decode(&self, source_uuid: &str, target_uuid: &str) -> EntityEdge {
        EntityEdge {
            base: BaseEdge {
                uuid: self.uuid.clone(),
                group_id: self.group_id.clone(),
                source_node_uuid: source_uuid.to_string(),
                target_node_uuid: target_uuid.to_string(),
                created_at: self.created_at,
            },
            name: self.name.clone(),
            fact: self.fact.clone(),
            fact_embedding: self.fact_embedding.clone(),
            episodes: self.episodes.clone(),
            valid_at: self.valid_at,
            invalid_at: self.invalid_at,
            expired_at: self.expired_at,
            attributes: self.attributes.clone(),
        }
    }
}

/// All state for one group partition.
#[derive(Debug, Clone, Default)]
struct GroupState {
    entity_nodes: HashMap<String, EntityNode>,
    episodic_nodes: HashMap<String, EpisodicNode>,
    community_nodes: HashMap<String, CommunityNode>,
    relates_to: HashMap<String, RelatesTo>,
    /// Arc (source)-[:RELATES_TO]->(r): entity uuid → RelatesTo uuids.
    outgoing: HashMap<String, HashSet<String>>,
    /// Arc (r)-[:RELATES_TO]->(target): entity uuid → RelatesTo uuids.
    incoming: HashMap<String, HashSet<String>>,
    /// Reverse arc lookups, RelatesTo uuid → endpoint uuid.
    arc_source: HashMap<String, String>,
    arc_target: HashMap<String, String>,
    mentions: HashMap<String, EpisodicEdge>,
    member_of: HashMap<String, CommunityEdge>,
}

impl GroupState {
    fn decode_edge(&self, relates_uuid: &str) -> Option<EntityEdge> {
        let record = self.relates_to.get(relates_uuid)?;
        let source = self.arc_source.get(relates_uuid)?;
        let target = self.arc_target.get(relates_uuid)?;
        Some(record.decode(source, target))
    }

    fn insert_edge(&mut self, edge: &EntityEdge) {
        let uuid = edge.base.uuid.clone();
        // Re-link arcs in case an upsert moved an endpoint.
        if let Some(old_source) = self.arc_source.remove(&uuid) {
            if let Some(set) = self.outgoing.get_mut(&old_source) {
                set.remove(&uuid);
            }
        }
        if let Some(old_target) = self.arc_target.remove(&uuid) {
            if let Some(set) = self.incoming.get_mut(&old_target) {
                set.remove(&uuid);
            }
        }

        self.relates_to.insert(uuid.clone(), RelatesTo::encode(edge));
        self.outgoing
            .entry(edge.base.source_node_uuid.clone())
            .or_default()
            .insert(uuid.clone());
        self.incoming
            .entry(edge.base.target_node_uuid.clone())
            .or_default()
            .insert(uuid.clone());
        self.arc_source
            .insert(uuid.clone(), edge.base.source_node_uuid.clone());
        self.arc_target.insert(uuid, edge.base.target_node_uuid.clone());
    }

    fn remove_edge(&mut self, uuid: &str) {
        self.relates_to.remove(uuid);
        if let Some(source) = self.arc_source.remove(uuid) {
            if let Some(set) = self.outgoing.get_mut(&source) {
                set.remove(uuid);
            }
        }
        if let Some(target) = self.arc_target.remove(uuid) {
            if let Some(set) = self.incoming.get_mut(&target) {
                set.remove(uuid);
            }
        }
    }

    fn remove_incident(&mut self, node_uuid: &str) {
        let mut incident: HashSet<String> = HashSet::new();
        if let Some(set) = self.outgoing.get(node_uuid) {
            incident.extend(set.iter().cloned());
        }
        if let Some(set) = self.incoming.get(node_uuid) {
            incident.extend(set.iter().cloned());
        }
        for uuid in incident {
            self.remove_edge(&uuid);
        }
        self.outgoing.remove(node_uuid);
        self.incoming.remove(node_uuid);

        self.mentions.retain(|_, e| {
            e.base.source_node_uuid != node_uuid && e.base.target_node_uuid != node_uuid
        });
        self.member_of.retain(|_, e| {
            e.base.source_node_uuid != node_uuid && e.base.target_node_uuid != node_uuid
        });
    }

    fn endpoints_exist(&self, edge: &EntityEdge) -> bool {
        self.entity_nodes.contains_key(&edge.base.source_node_uuid)
            && self.entity_nodes.contains_key(&edge.base.target_node_uuid)
    }
}

/// BM25 over a small corpus of (id, text) documents. Computed per query;
/// the embedded store keeps no standing postings.
fn bm25_rank(query: &str, docs: &[(String, String)], limit: usize) -> Vec<(String, f64)> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() || docs.is_empty() {
        return Vec::new();
    }

    let tokenized: Vec<(usize, Vec<String>)> = docs
        .iter()
        .enumerate()
        .map(|(i, (_, text))| (i, tokenize(text)))
        .collect();

    let n = tokenized.len() as f64;
    let avg_len: f64 =
        tokenized.iter().map(|(_, t)| t.len() as f64).sum::<f64>() / n;

    let mut doc_freq: HashMap<&str, f64> = HashMap::new();
    for term in &query_terms {
        let df = tokenized
            .iter()
            .filter(|(_, tokens)| tokens.iter().any(|t| t == term))
            .count() as f64;
        doc_freq.insert(term.as_str(), df);
    }

    let mut scored: Vec<(String, f64)> = Vec::new();
    for (i, tokens) in &tokenized {
        let len = tokens.len() as f64;
        let mut score = 0.0;
        for term in &query_terms {
            let df = doc_freq[term.as_str()];
            if df == 0.0 {
                continue;
            }
            let tf = tokens.iter().filter(|t| *t == term).count() as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1.0));
            score += idf * tf * (BM25_K1 + 1.0) / denom;
        }
        if score > 0.0 {
            scored.push((docs[*i].0.clone(), score));
        }
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Embedded analytical store. All state lives in process memory behind a
/// single `RwLock`; batch writes stage on a scratch copy of the group and
/// swap on success, so a mid-batch failure leaves nothing applied.
#[derive(Debug, Default)]
pub struct EmbeddedGraphStore {
    groups: RwLock<HashMap<String, GroupState>>,
}

impl EmbeddedGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphProvider for EmbeddedGraphStore {
    async fn create_indices(&self) -> ProviderResult<()> {
        // Scans double as indices here; establishing them is a no-op and
        // trivially idempotent.
        Ok(())
    }

    async fn health_check(&self) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn close(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn get_entity_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityNode> {
        let groups = self.groups.read().await;
        groups
            .get(group_id)
            .and_then(|g| g.entity_nodes.get(uuid))
            .cloned()
            .ok_or_else(|| ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            })
    }

    async fn get_episodic_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EpisodicNode> {
        let groups = self.groups.read().await;
        groups
            .get(group_id)
            .and_then(|g| g.episodic_nodes.get(uuid))
            .cloned()
            .ok_or_else(|| ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            })
    }

    async fn get_community_node(
        &self,
        uuid: &str,
        group_id: &str,
    ) -> ProviderResult<CommunityNode> {
        let groups = self.groups.read().await;
        groups
            .get(group_id)
            .and_then(|g| g.community_nodes.get(uuid))
            .cloned()
            .ok_or_else(|| ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            })
    }

    async fn upsert_entity_node(&self, node: &EntityNode) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(node.base.group_id.clone()).or_default();
        group
            .entity_nodes
            .insert(node.base.uuid.clone(), node.clone());
        Ok(())
    }

    async fn upsert_episodic_node(&self, node: &EpisodicNode) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(node.base.group_id.clone()).or_default();
        group
            .episodic_nodes
            .insert(node.base.uuid.clone(), node.clone());
        Ok(())
    }

    async fn upsert_community_node(&self, node: &CommunityNode) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(node.base.group_id.clone()).or_default();
        group
            .community_nodes
            .insert(node.base.uuid.clone(), node.clone());
        Ok(())
    }

    async fn delete_node(&self, uuid: &str, group_id: &str) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            })?;

        let known = group.entity_nodes.remove(uuid).is_some()
            || group.episodic_nodes.remove(uuid).is_some()
            || group.community_nodes.remove(uuid).is_some();
        if !known {
            return Err(ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            });
        }
        group.remove_incident(uuid);
        Ok(())
    }

    async fn get_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityEdge> {
        let groups = self.groups.read().await;
        groups
            .get(group_id)
            .and_then(|g| g.decode_edge(uuid))
            .ok_or_else(|| ProviderError::EdgeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            })
    }

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(edge.base.group_id.clone()).or_default();
        if !group.endpoints_exist(edge) {
            return Err(ProviderError::Backend(format!(
                "edge {} references missing endpoint",
                edge.base.uuid
            )));
        }
        group.insert_edge(edge);
        Ok(())
    }

    async fn delete_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| ProviderError::EdgeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            })?;
        if !group.relates_to.contains_key(uuid) {
            return Err(ProviderError::EdgeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            });
        }
        group.remove_edge(uuid);
        Ok(())
    }

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(edge.base.group_id.clone()).or_default();
        group.mentions.insert(edge.base.uuid.clone(), edge.clone());
        Ok(())
    }

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(edge.base.group_id.clone()).or_default();
        group.member_of.insert(edge.base.uuid.clone(), edge.clone());
        Ok(())
    }

    async fn upsert_entity_nodes(&self, nodes: &[EntityNode]) -> ProviderResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut groups = self.groups.write().await;
        // Single-group batches are the rule; stage each touched group on a
        // scratch copy and swap only when the whole batch applied.
        let mut staged: HashMap<String, GroupState> = HashMap::new();
        for node in nodes {
            let state = staged
                .entry(node.base.group_id.clone())
                .or_insert_with(|| groups.get(&node.base.group_id).cloned().unwrap_or_default());
            state
                .entity_nodes
                .insert(node.base.uuid.clone(), node.clone());
        }
        for (group_id, state) in staged {
            groups.insert(group_id, state);
        }
        Ok(())
    }

    async fn upsert_entity_edges(&self, edges: &[EntityEdge]) -> ProviderResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let mut groups = self.groups.write().await;
        let mut staged: HashMap<String, GroupState> = HashMap::new();
        for edge in edges {
            let state = staged
                .entry(edge.base.group_id.clone())
                .or_insert_with(|| groups.get(&edge.base.group_id).cloned().unwrap_or_default());
            if !state.endpoints_exist(edge) {
                // Nothing staged is applied; the backend stays as it was.
                return Err(ProviderError::Backend(format!(
                    "edge {} references missing endpoint; batch rolled back",
                    edge.base.uuid
                )));
            }
            state.insert_edge(edge);
        }
        for (group_id, state) in staged {
            groups.insert(group_id, state);
        }
        Ok(())
    }

    async fn upsert_episodic_edges(&self, edges: &[EpisodicEdge]) -> ProviderResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let mut groups = self.groups.write().await;
        let mut staged: HashMap<String, GroupState> = HashMap::new();
        for edge in edges {
            let state = staged
                .entry(edge.base.group_id.clone())
                .or_insert_with(|| groups.get(&edge.base.group_id).cloned().unwrap_or_default());
            state.mentions.insert(edge.base.uuid.clone(), edge.clone());
        }
        for (group_id, state) in staged {
            groups.insert(group_id, state);
        }
        Ok(())
    }

    async fn get_neighbors(
        &self,
        uuid: &str,
        group_id: &str,
        max_distance: usize,
    ) -> ProviderResult<Vec<EntityNode>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(uuid.to_string());
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        frontier.push_back((uuid.to_string(), 0));
        let mut result = Vec::new();

        while let Some((current, distance)) = frontier.pop_front() {
            if distance >= max_distance {
                continue;
            }
            let mut relates: HashSet<&String> = HashSet::new();
            if let Some(set) = group.outgoing.get(&current) {
                relates.extend(set.iter());
            }
            if let Some(set) = group.incoming.get(&current) {
                relates.extend(set.iter());
            }
            // One logical hop is the full (source)->(r)->(target) pattern.
            for relates_uuid in relates {
                let (Some(source), Some(target)) = (
                    group.arc_source.get(relates_uuid),
                    group.arc_target.get(relates_uuid),
                ) else {
                    continue;
                };
                let other = if source == &current { target } else { source };
                if visited.insert(other.clone()) {
                    if let Some(node) = group.entity_nodes.get(other) {
                        result.push(node.clone());
                    }
                    frontier.push_back((other.clone(), distance + 1));
                }
            }
        }

        Ok(result)
    }

    async fn get_edges_between(
        &self,
        source_uuid: &str,
        target_uuid: &str,
        group_id: &str,
    ) -> ProviderResult<Vec<EntityEdge>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let Some(out) = group.outgoing.get(source_uuid) else {
            return Ok(Vec::new());
        };
        let mut edges: Vec<EntityEdge> = out
            .iter()
            .filter(|r| group.arc_target.get(*r).map(|t| t == target_uuid) == Some(true))
            .filter_map(|r| group.decode_edge(r))
            .collect();
        edges.sort_by(|a, b| a.base.created_at.cmp(&b.base.created_at));
        Ok(edges)
    }

    async fn get_recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<EpisodicNode>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let mut episodes: Vec<EpisodicNode> = group.episodic_nodes.values().cloned().collect();
        episodes.sort_by(|a, b| b.reference_time.cmp(&a.reference_time));
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn search_nodes_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let mut scored: Vec<(EntityNode, f64)> = group
            .entity_nodes
            .values()
            .filter_map(|node| {
                let embedding = node.name_embedding.as_ref()?;
                let score = cosine_similarity(vector, embedding);
                (score > 0.0).then(|| (node.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn search_edges_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let mut scored: Vec<(EntityEdge, f64)> = group
            .relates_to
            .values()
            .filter_map(|record| {
                let embedding = record.fact_embedding.as_ref()?;
                let score = cosine_similarity(vector, embedding);
                if score <= 0.0 {
                    return None;
                }
                group.decode_edge(&record.uuid).map(|e| (e, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn search_nodes_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let docs: Vec<(String, String)> = group
            .entity_nodes
            .values()
            .map(|n| {
                (
                    n.base.uuid.clone(),
                    format!("{} {}", n.base.name, n.summary),
                )
            })
            .collect();
        let ranked = bm25_rank(query, &docs, limit);
        Ok(ranked
            .into_iter()
            .filter_map(|(uuid, score)| {
                group.entity_nodes.get(&uuid).map(|n| (n.clone(), score))
            })
            .collect())
    }

    async fn search_edges_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        // Fulltext over facts is exactly why the RelatesTo encoding exists:
        // the documents are nodes, not edge properties.
        let docs: Vec<(String, String)> = group
            .relates_to
            .values()
            .map(|r| (r.uuid.clone(), format!("{} {}", r.name, r.fact)))
            .collect();
        let ranked = bm25_rank(query, &docs, limit);
        Ok(ranked
            .into_iter()
            .filter_map(|(uuid, score)| group.decode_edge(&uuid).map(|e| (e, score)))
            .collect())
    }

    async fn get_nodes_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityNode>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let mut nodes: Vec<EntityNode> = group
            .entity_nodes
            .values()
            .filter(|n| n.base.created_at >= start && n.base.created_at < end)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.base.created_at.cmp(&b.base.created_at));
        Ok(nodes)
    }

    async fn get_edges_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityEdge>> {
        let groups = self.groups.read().await;
        let group = match groups.get(group_id) {
            Some(g) => g,
            None => return Ok(Vec::new()),
        };
        let mut edges: Vec<EntityEdge> = group
            .relates_to
            .values()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .filter_map(|r| group.decode_edge(&r.uuid))
            .collect();
        edges.sort_by(|a, b| a.base.created_at.cmp(&b.base.created_at));
        Ok(edges)
    }

    async fn get_entity_nodes(&self, group_id: &str) -> ProviderResult<Vec<EntityNode>> {
        let groups = self.groups.read().await;
        Ok(groups
            .get(group_id)
            .map(|g| g.entity_nodes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_entity_edges(&self, group_id: &str) -> ProviderResult<Vec<EntityEdge>> {
        let groups = self.groups.read().await;
        Ok(groups
            .get(group_id)
            .map(|g| {
                g.relates_to
                    .keys()
                    .filter_map(|uuid| g.decode_edge(uuid))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_community_nodes(&self, group_id: &str) -> ProviderResult<Vec<CommunityNode>> {
        let groups = self.groups.read().await;
        Ok(groups
            .get(group_id)
            .map(|g| g.community_nodes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, group_id: &str) -> ProviderResult<()> {
        let mut groups = self.groups.write().await;
        groups.remove(group_id);
        Ok(())
    }
}
