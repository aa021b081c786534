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

//! Graph provider abstraction.
//!
//! A provider owns all persisted graph state: the four node kinds, the
//! three edge kinds, and the fulltext/vector indices over them. Ingestion
//! and retrieval code talk to this trait only; backend quirks (notably
//! the edge-as-node encoding of the embedded store) never leak past it.

pub mod bolt;
pub mod embedded;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    edges::{CommunityEdge, EntityEdge, EpisodicEdge},
    errors::ProviderResult,
    nodes::{CommunityNode, EntityNode, EpisodicNode},
};

pub use bolt::BoltGraphStore;
pub use embedded::EmbeddedGraphStore;

/// Fixed property names shared by every backend (§ persisted state layout).
pub mod props {
    pub const UUID: &str = "uuid";
    pub const NAME: &str = "name";
    pub const GROUP_ID: &str = "group_id";
    pub const CREATED_AT: &str = "created_at";
    pub const VALID_AT: &str = "valid_at";
    pub const INVALID_AT: &str = "invalid_at";
    pub const EXPIRED_AT: &str = "expired_at";
    pub const FACT: &str = "fact";
    pub const FACT_EMBEDDING: &str = "fact_embedding";
    pub const NAME_EMBEDDING: &str = "name_embedding";
    pub const LABELS: &str = "labels";
    pub const ATTRIBUTES: &str = "attributes";
    pub const EPISODES: &str = "episodes";
    pub const CONTENT: &str = "content";
    pub const SOURCE: &str = "source";
    pub const SOURCE_DESCRIPTION: &str = "source_description";
    pub const REFERENCE_TIME: &str = "reference_time";
    pub const ENTITY_EDGES: &str = "entity_edges";
    pub const SUMMARY: &str = "summary";
}

/// Node labels / relationship types on the wire.
pub mod kinds {
    pub const ENTITY: &str = "Entity";
    pub const EPISODIC: &str = "Episodic";
    pub const COMMUNITY: &str = "Community";
    /// Intermediate node kind used by backends that cannot index edge
    /// properties; internal to those backends.
    pub const RELATES_TO: &str = "RelatesTo";
    pub const MENTIONS: &str = "MENTIONS";
    pub const MEMBER_OF: &str = "MEMBER_OF";
}

/// Uniform CRUD and query surface over a logical graph, partitioned by
/// group id. Get operations report absence as `ProviderError::*NotFound`,
/// never as an empty success. Batch upserts are atomic per call.
#[async_trait]
pub trait GraphProvider: Send + Sync {
    /// Idempotently establish primary, fulltext, and vector indices.
    async fn create_indices(&self) -> ProviderResult<()>;

    async fn health_check(&self) -> ProviderResult<bool>;

    async fn close(&self) -> ProviderResult<()>;

    // Node operations

    async fn get_entity_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityNode>;

    async fn get_episodic_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EpisodicNode>;

    async fn get_community_node(&self, uuid: &str, group_id: &str)
        -> ProviderResult<CommunityNode>;

    async fn upsert_entity_node(&self, node: &EntityNode) -> ProviderResult<()>;

    async fn upsert_episodic_node(&self, node: &EpisodicNode) -> ProviderResult<()>;

    async fn upsert_community_node(&self, node: &CommunityNode) -> ProviderResult<()>;

    /// Delete a node of any kind together with all incident edges.
    async fn delete_node(&self, uuid: &str, group_id: &str) -> ProviderResult<()>;

    // Edge operations

    async fn get_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityEdge>;

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> ProviderResult<()>;

    async fn delete_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<()>;

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> ProviderResult<()>;

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> ProviderResult<()>;

    // Batch operations, all-or-nothing at the backend's transactional
    // granularity.

    async fn upsert_entity_nodes(&self, nodes: &[EntityNode]) -> ProviderResult<()>;

    async fn upsert_entity_edges(&self, edges: &[EntityEdge]) -> ProviderResult<()>;

    async fn upsert_episodic_edges(&self, edges: &[EpisodicEdge]) -> ProviderResult<()>;

    // Traversal

    /// BFS over entity edges up to `max_distance` hops. Results are
    /// deduplicated and exclude the start node.
    async fn get_neighbors(
        &self,
        uuid: &str,
        group_id: &str,
        max_distance: usize,
    ) -> ProviderResult<Vec<EntityNode>>;

    /// All entity edges (any direction of the pair ordering is the
    /// caller's concern; this returns source→target as stored) between
    /// two nodes.
    async fn get_edges_between(
        &self,
        source_uuid: &str,
        target_uuid: &str,
        group_id: &str,
    ) -> ProviderResult<Vec<EntityEdge>>;

    /// Most recent episodes in the group by reference time, newest first.
    async fn get_recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<EpisodicNode>>;

    // Search

    /// Cosine similarity over `name_embedding`, descending; scores are
    /// strictly greater than zero.
    async fn search_nodes_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>>;

    /// Cosine similarity over `fact_embedding`, descending; scores are
    /// strictly greater than zero.
    async fn search_edges_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>>;

    /// BM25 over `(name, summary)`.
    async fn search_nodes_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>>;

    /// BM25 over `(name, fact)`.
    async fn search_edges_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>>;

    // Time-range scans by ingestion time

    async fn get_nodes_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityNode>>;

    async fn get_edges_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityEdge>>;

    // Full scans (community building, audits)

    async fn get_entity_nodes(&self, group_id: &str) -> ProviderResult<Vec<EntityNode>>;

    async fn get_entity_edges(&self, group_id: &str) -> ProviderResult<Vec<EntityEdge>>;

    async fn get_community_nodes(&self, group_id: &str) -> ProviderResult<Vec<CommunityNode>>;

    /// Remove all nodes and edges for a group.
    async fn clear(&self, group_id: &str) -> ProviderResult<()>;
}
