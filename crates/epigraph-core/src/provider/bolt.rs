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

//! Bolt-protocol graph store.
//!
//! Entity edges are stored directly as `RELATES_TO` relationships with the
//! relation name as a property; no intermediate node is needed because the
//! server can index relationship properties. Fulltext goes through the
//! Lucene procedures, vectors through the native vector indices. Queries
//! return explicit property columns, so decoding never depends on driver
//! entity types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{BoltFloat, BoltList, BoltNull, BoltType, ConfigBuilder, Graph, Query, Row};
use std::collections::HashMap;

use crate::{
    edges::{BaseEdge, CommunityEdge, EntityEdge, EpisodicEdge},
    errors::{ProviderError, ProviderResult},
    helpers::lucene_sanitize,
    nodes::{BaseNode, CommunityNode, EntityNode, EpisodeSource, EpisodicNode},
    provider::GraphProvider,
};

/// Connection settings for a Bolt backend.
#[derive(Debug, Clone)]
pub struct BoltConfig {
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Dimensionality declared on the vector indices.
    pub embedding_dim: usize,
}

impl Default for BoltConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            username: Some("neo4j".to_string()),
            password: None,
            database: None,
            embedding_dim: 1024,
        }
    }
}

/// Graph store backed by a Bolt-protocol server.
pub struct BoltGraphStore {
    graph: Graph,
    embedding_dim: usize,
}

impl BoltGraphStore {
    pub async fn connect(config: BoltConfig) -> ProviderResult<Self> {
        let mut builder = ConfigBuilder::default().uri(&config.uri);

        if let Some(username) = &config.username {
            builder = builder.user(username);
        }
        if let Some(password) = &config.password {
            builder = builder.password(password);
        }
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }

        let built = builder
            .build()
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        let graph = Graph::connect(built).await?;

        Ok(Self {
            graph,
            embedding_dim: config.embedding_dim,
        })
    }
}

// Column projections reused by every read path.

const ENTITY_COLUMNS: &str = "n.uuid AS uuid, n.name AS name, n.group_id AS group_id, \
     n.labels AS labels, n.created_at AS created_at, n.summary AS summary, \
     n.name_embedding AS name_embedding, n.attributes AS attributes";

const EPISODIC_COLUMNS: &str = "n.uuid AS uuid, n.name AS name, n.group_id AS group_id, \
     n.created_at AS created_at, n.source AS source, \
     n.source_description AS source_description, n.content AS content, \
     n.reference_time AS reference_time, n.entity_edges AS entity_edges";

const COMMUNITY_COLUMNS: &str = "n.uuid AS uuid, n.name AS name, n.group_id AS group_id, \
     n.created_at AS created_at, n.summary AS summary, \
     n.name_embedding AS name_embedding";

const EDGE_COLUMNS: &str = "r.uuid AS uuid, r.name AS name, r.group_id AS group_id, \
     r.created_at AS created_at, r.fact AS fact, r.fact_embedding AS fact_embedding, \
     r.episodes AS episodes, r.valid_at AS valid_at, r.invalid_at AS invalid_at, \
     r.expired_at AS expired_at, r.attributes AS attributes, \
     source.uuid AS source_uuid, target.uuid AS target_uuid";

fn backend_err(e: impl std::fmt::Display) -> ProviderError {
    ProviderError::Backend(e.to_string())
}

fn get_string(row: &Row, column: &str) -> ProviderResult<String> {
    row.get::<String>(column).map_err(backend_err)
}

fn get_opt_string(row: &Row, column: &str) -> ProviderResult<Option<String>> {
    row.get::<Option<String>>(column).map_err(backend_err)
}

fn get_string_list(row: &Row, column: &str) -> ProviderResult<Vec<String>> {
    Ok(row
        .get::<Option<Vec<String>>>(column)
        .map_err(backend_err)?
        .unwrap_or_default())
}

fn get_embedding(row: &Row, column: &str) -> ProviderResult<Option<Vec<f32>>> {
    let raw = row.get::<Option<Vec<f64>>>(column).map_err(backend_err)?;
    Ok(raw.map(|vec| vec.into_iter().map(|v| v as f32).collect()))
}

fn get_datetime(row: &Row, column: &str) -> ProviderResult<DateTime<Utc>> {
    let raw = get_string(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProviderError::Backend(format!("bad datetime in {}: {}", column, e)))
}

fn get_opt_datetime(row: &Row, column: &str) -> ProviderResult<Option<DateTime<Utc>>> {
    match get_opt_string(row, column)? {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| ProviderError::Backend(format!("bad datetime in {}: {}", column, e))),
    }
}

fn get_attributes(row: &Row) -> ProviderResult<HashMap<String, serde_json::Value>> {
    match get_opt_string(row, "attributes")? {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(&raw).map_err(ProviderError::Serialization),
    }
}

fn entity_from_row(row: &Row) -> ProviderResult<EntityNode> {
    Ok(EntityNode {
        base: BaseNode {
            uuid: get_string(row, "uuid")?,
            name: get_string(row, "name")?,
            group_id: get_string(row, "group_id")?,
            labels: get_string_list(row, "labels")?,
            created_at: get_datetime(row, "created_at")?,
        },
        summary: get_string(row, "summary")?,
        name_embedding: get_embedding(row, "name_embedding")?,
        attributes: get_attributes(row)?,
    })
}

fn episodic_from_row(row: &Row) -> ProviderResult<EpisodicNode> {
    let source = EpisodeSource::from_str(&get_string(row, "source")?)
        .map_err(|e| ProviderError::Backend(e.to_string()))?;
    Ok(EpisodicNode {
        base: BaseNode {
            uuid: get_string(row, "uuid")?,
            name: get_string(row, "name")?,
            group_id: get_string(row, "group_id")?,
            labels: Vec::new(),
            created_at: get_datetime(row, "created_at")?,
        },
        source,
        source_description: get_string(row, "source_description")?,
        content: get_string(row, "content")?,
        reference_time: get_datetime(row, "reference_time")?,
        entity_edges: get_string_list(row, "entity_edges")?,
    })
}

fn community_from_row(row: &Row) -> ProviderResult<CommunityNode> {
    Ok(CommunityNode {
        base: BaseNode {
            uuid: get_string(row, "uuid")?,
            name: get_string(row, "name")?,
            group_id: get_string(row, "group_id")?,
            labels: Vec::new(),
            created_at: get_datetime(row, "created_at")?,
        },
        summary: get_string(row, "summary")?,
        name_embedding: get_embedding(row, "name_embedding")?,
    })
}

fn edge_from_row(row: &Row) -> ProviderResult<EntityEdge> {
    Ok(EntityEdge {
        base: BaseEdge {
            uuid: get_string(row, "uuid")?,
            group_id: get_string(row, "group_id")?,
            source_node_uuid: get_string(row, "source_uuid")?,
            target_node_uuid: get_string(row, "target_uuid")?,
            created_at: get_datetime(row, "created_at")?,
        },
        name: get_string(row, "name")?,
        fact: get_string(row, "fact")?,
        fact_embedding: get_embedding(row, "fact_embedding")?,
        episodes: get_string_list(row, "episodes")?,
        valid_at: get_datetime(row, "valid_at")?,
        invalid_at: get_opt_datetime(row, "invalid_at")?,
        expired_at: get_opt_datetime(row, "expired_at")?,
        attributes: get_attributes(row)?,
    })
}

fn embedding_param(embedding: Option<&[f32]>) -> BoltType {
    match embedding {
        Some(vec) => {
            let mut list = BoltList::new();
            for v in vec {
                list.push(BoltType::Float(BoltFloat::new(*v as f64)));
            }
            BoltType::List(list)
        }
        None => BoltType::Null(BoltNull),
    }
}

fn entity_node_query(node: &EntityNode, query_text: &str) -> ProviderResult<Query> {
    let attributes = serde_json::to_string(&node.attributes)?;
    Ok(Query::new(query_text.to_string())
        .param("uuid", node.base.uuid.clone())
        .param("name", node.base.name.clone())
        .param("group_id", node.base.group_id.clone())
        .param("labels", node.base.labels.clone())
        .param("created_at", node.base.created_at.to_rfc3339())
        .param("summary", node.summary.clone())
        .param(
            "name_embedding",
            embedding_param(node.name_embedding.as_deref()),
        )
        .param("attributes", attributes))
}

const UPSERT_ENTITY_NODE: &str = "MERGE (n:Entity {uuid: $uuid, group_id: $group_id})
     SET n.name = $name,
         n.labels = $labels,
         n.created_at = $created_at,
         n.summary = $summary,
         n.name_embedding = $name_embedding,
         n.attributes = $attributes";

fn entity_edge_query(edge: &EntityEdge, query_text: &str) -> ProviderResult<Query> {
    let attributes = serde_json::to_string(&edge.attributes)?;
    Ok(Query::new(query_text.to_string())
        .param("source_uuid", edge.base.source_node_uuid.clone())
        .param("target_uuid", edge.base.target_node_uuid.clone())
        .param("uuid", edge.base.uuid.clone())
        .param("name", edge.name.clone())
        .param("group_id", edge.base.group_id.clone())
        .param("created_at", edge.base.created_at.to_rfc3339())
        .param("fact", edge.fact.clone())
        .param(
            "fact_embedding",
            embedding_param(edge.fact_embedding.as_deref()),
        )
        .param("episodes", edge.episodes.clone())
        .param("valid_at", edge.valid_at.to_rfc3339())
        .param("invalid_at", edge.invalid_at.map(|dt| dt.to_rfc3339()))
        .param("expired_at", edge.expired_at.map(|dt| dt.to_rfc3339()))
        .param("attributes", attributes))
}

const UPSERT_ENTITY_EDGE: &str = "MATCH (source:Entity {uuid: $source_uuid, group_id: $group_id})
     MATCH (target:Entity {uuid: $target_uuid, group_id: $group_id})
     MERGE (source)-[r:RELATES_TO {uuid: $uuid}]->(target)
     SET r.name = $name,
         r.group_id = $group_id,
         r.created_at = $created_at,
         r.fact = $fact,
         r.fact_embedding = $fact_embedding,
         r.episodes = $episodes,
         r.valid_at = $valid_at,
         r.invalid_at = $invalid_at,
         r.expired_at = $expired_at,
         r.attributes = $attributes";

fn episodic_edge_query(edge: &EpisodicEdge) -> Query {
    Query::new(
        "MATCH (episode:Episodic {uuid: $episode_uuid, group_id: $group_id})
         MATCH (entity:Entity {uuid: $entity_uuid, group_id: $group_id})
         MERGE (episode)-[r:MENTIONS {uuid: $uuid}]->(entity)
         SET r.group_id = $group_id,
             r.created_at = $created_at"
            .to_string(),
    )
    .param("episode_uuid", edge.base.source_node_uuid.clone())
    .param("entity_uuid", edge.base.target_node_uuid.clone())
    .param("uuid", edge.base.uuid.clone())
    .param("group_id", edge.base.group_id.clone())
    .param("created_at", edge.base.created_at.to_rfc3339())
}

impl BoltGraphStore {
    async fn fetch_entities(&self, query: Query) -> ProviderResult<Vec<EntityNode>> {
        let mut result = self.graph.execute(query).await?;
        let mut nodes = Vec::new();
        while let Some(row) = result.next().await? {
            nodes.push(entity_from_row(&row)?);
        }
        Ok(nodes)
    }

    async fn fetch_edges(&self, query: Query) -> ProviderResult<Vec<EntityEdge>> {
        let mut result = self.graph.execute(query).await?;
        let mut edges = Vec::new();
        while let Some(row) = result.next().await? {
            edges.push(edge_from_row(&row)?);
        }
        Ok(edges)
    }

    async fn fetch_scored_entities(&self, query: Query) -> ProviderResult<Vec<(EntityNode, f64)>> {
        let mut result = self.graph.execute(query).await?;
        let mut scored = Vec::new();
        while let Some(row) = result.next().await? {
            let score: f64 = row.get("score").map_err(backend_err)?;
            scored.push((entity_from_row(&row)?, score));
        }
        Ok(scored)
    }

    async fn fetch_scored_edges(&self, query: Query) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        let mut result = self.graph.execute(query).await?;
        let mut scored = Vec::new();
        while let Some(row) = result.next().await? {
            let score: f64 = row.get("score").map_err(backend_err)?;
            scored.push((edge_from_row(&row)?, score));
        }
        Ok(scored)
    }
}

#[async_trait]
impl GraphProvider for BoltGraphStore {
    async fn create_indices(&self) -> ProviderResult<()> {
        let statements = vec![
            "CREATE CONSTRAINT entity_uuid IF NOT EXISTS FOR (n:Entity) REQUIRE n.uuid IS UNIQUE"
                .to_string(),
            "CREATE CONSTRAINT episodic_uuid IF NOT EXISTS FOR (n:Episodic) REQUIRE n.uuid IS UNIQUE"
                .to_string(),
            "CREATE CONSTRAINT community_uuid IF NOT EXISTS FOR (n:Community) REQUIRE n.uuid IS UNIQUE"
                .to_string(),
            "CREATE INDEX entity_group IF NOT EXISTS FOR (n:Entity) ON (n.group_id)".to_string(),
            "CREATE INDEX episodic_group IF NOT EXISTS FOR (n:Episodic) ON (n.group_id)".to_string(),
            "CREATE FULLTEXT INDEX entity_fulltext IF NOT EXISTS \
             FOR (n:Entity) ON EACH [n.name, n.summary]"
                .to_string(),
            "CREATE FULLTEXT INDEX edge_fulltext IF NOT EXISTS \
             FOR ()-[r:RELATES_TO]-() ON EACH [r.name, r.fact]"
                .to_string(),
            format!(
                "CREATE VECTOR INDEX entity_embedding IF NOT EXISTS \
                 FOR (n:Entity) ON n.name_embedding \
                 OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: 'cosine'}}}}",
                self.embedding_dim
            ),
            format!(
                "CREATE VECTOR INDEX edge_embedding IF NOT EXISTS \
                 FOR ()-[r:RELATES_TO]-() ON r.fact_embedding \
                 OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: 'cosine'}}}}",
                self.embedding_dim
            ),
        ];

        for statement in statements {
            self.graph.run(Query::new(statement)).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> ProviderResult<bool> {
        let mut result = self
            .graph
            .execute(Query::new("RETURN 1 AS health".to_string()))
            .await?;
        Ok(result.next().await?.is_some())
    }

    async fn close(&self) -> ProviderResult<()> {
        // The driver cleans up on drop.
        Ok(())
    }

    async fn get_entity_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityNode> {
        let query = Query::new(format!(
            "MATCH (n:Entity {{uuid: $uuid, group_id: $group_id}}) RETURN {}",
            ENTITY_COLUMNS
        ))
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => entity_from_row(&row),
            None => Err(ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            }),
        }
    }

    async fn get_episodic_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EpisodicNode> {
        let query = Query::new(format!(
            "MATCH (n:Episodic {{uuid: $uuid, group_id: $group_id}}) RETURN {}",
            EPISODIC_COLUMNS
        ))
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => episodic_from_row(&row),
            None => Err(ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            }),
        }
    }

    async fn get_community_node(
        &self,
        uuid: &str,
        group_id: &str,
    ) -> ProviderResult<CommunityNode> {
        let query = Query::new(format!(
            "MATCH (n:Community {{uuid: $uuid, group_id: $group_id}}) RETURN {}",
            COMMUNITY_COLUMNS
        ))
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => community_from_row(&row),
            None => Err(ProviderError::NodeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            }),
        }
    }

    async fn upsert_entity_node(&self, node: &EntityNode) -> ProviderResult<()> {
        self.graph
            .run(entity_node_query(node, UPSERT_ENTITY_NODE)?)
            .await?;
        Ok(())
    }

    async fn upsert_episodic_node(&self, node: &EpisodicNode) -> ProviderResult<()> {
        let query = Query::new(
            "MERGE (n:Episodic {uuid: $uuid, group_id: $group_id})
             SET n.name = $name,
                 n.created_at = $created_at,
                 n.source = $source,
                 n.source_description = $source_description,
                 n.content = $content,
                 n.reference_time = $reference_time,
                 n.entity_edges = $entity_edges"
                .to_string(),
        )
        .param("uuid", node.base.uuid.clone())
        .param("group_id", node.base.group_id.clone())
        .param("name", node.base.name.clone())
        .param("created_at", node.base.created_at.to_rfc3339())
        .param("source", node.source.as_str())
        .param("source_description", node.source_description.clone())
        .param("content", node.content.clone())
        .param("reference_time", node.reference_time.to_rfc3339())
        .param("entity_edges", node.entity_edges.clone());

        self.graph.run(query).await?;
        Ok(())
    }

    async fn upsert_community_node(&self, node: &CommunityNode) -> ProviderResult<()> {
        let query = Query::new(
            "MERGE (n:Community {uuid: $uuid, group_id: $group_id})
             SET n.name = $name,
                 n.created_at = $created_at,
                 n.summary = $summary,
                 n.name_embedding = $name_embedding"
                .to_string(),
        )
        .param("uuid", node.base.uuid.clone())
        .param("group_id", node.base.group_id.clone())
        .param("name", node.base.name.clone())
        .param("created_at", node.base.created_at.to_rfc3339())
        .param("summary", node.summary.clone())
        .param(
            "name_embedding",
            embedding_param(node.name_embedding.as_deref()),
        );

        self.graph.run(query).await?;
        Ok(())
    }

    async fn delete_node(&self, uuid: &str, group_id: &str) -> ProviderResult<()> {
        let query = Query::new(
            "MATCH (n {uuid: $uuid, group_id: $group_id}) DETACH DELETE n".to_string(),
        )
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        self.graph.run(query).await?;
        Ok(())
    }

    async fn get_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityEdge> {
        let query = Query::new(format!(
            "MATCH (source:Entity)-[r:RELATES_TO {{uuid: $uuid, group_id: $group_id}}]->(target:Entity)
             RETURN {}",
            EDGE_COLUMNS
        ))
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => edge_from_row(&row),
            None => Err(ProviderError::EdgeNotFound {
                uuid: uuid.to_string(),
                group_id: group_id.to_string(),
            }),
        }
    }

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> ProviderResult<()> {
        self.graph
            .run(entity_edge_query(edge, UPSERT_ENTITY_EDGE)?)
            .await?;
        Ok(())
    }

    async fn delete_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<()> {
        let query = Query::new(
            "MATCH ()-[r:RELATES_TO {uuid: $uuid, group_id: $group_id}]->() DELETE r".to_string(),
        )
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        self.graph.run(query).await?;
        Ok(())
    }

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> ProviderResult<()> {
        self.graph.run(episodic_edge_query(edge)).await?;
        Ok(())
    }

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> ProviderResult<()> {
        let query = Query::new(
            "MATCH (entity:Entity {uuid: $entity_uuid, group_id: $group_id})
             MATCH (community:Community {uuid: $community_uuid, group_id: $group_id})
             MERGE (entity)-[r:MEMBER_OF {uuid: $uuid}]->(community)
             SET r.group_id = $group_id,
                 r.created_at = $created_at"
                .to_string(),
        )
        .param("entity_uuid", edge.base.source_node_uuid.clone())
        .param("community_uuid", edge.base.target_node_uuid.clone())
        .param("uuid", edge.base.uuid.clone())
        .param("group_id", edge.base.group_id.clone())
        .param("created_at", edge.base.created_at.to_rfc3339());

        self.graph.run(query).await?;
        Ok(())
    }

    async fn upsert_entity_nodes(&self, nodes: &[EntityNode]) -> ProviderResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut queries = Vec::with_capacity(nodes.len());
        for node in nodes {
            queries.push(entity_node_query(node, UPSERT_ENTITY_NODE)?);
        }
        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn upsert_entity_edges(&self, edges: &[EntityEdge]) -> ProviderResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let mut queries = Vec::with_capacity(edges.len());
        for edge in edges {
            queries.push(entity_edge_query(edge, UPSERT_ENTITY_EDGE)?);
        }
        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn upsert_episodic_edges(&self, edges: &[EpisodicEdge]) -> ProviderResult<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let queries: Vec<Query> = edges.iter().map(episodic_edge_query).collect();
        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn get_neighbors(
        &self,
        uuid: &str,
        group_id: &str,
        max_distance: usize,
    ) -> ProviderResult<Vec<EntityNode>> {
        // Path length cannot be parameterized in Cypher.
        let query = Query::new(format!(
            "MATCH (start:Entity {{uuid: $uuid, group_id: $group_id}})-[:RELATES_TO*1..{}]-(n:Entity)
             WHERE n.uuid <> $uuid
             RETURN DISTINCT {}",
            max_distance.max(1),
            ENTITY_COLUMNS
        ))
        .param("uuid", uuid.to_string())
        .param("group_id", group_id.to_string());

        self.fetch_entities(query).await
    }

    async fn get_edges_between(
        &self,
        source_uuid: &str,
        target_uuid: &str,
        group_id: &str,
    ) -> ProviderResult<Vec<EntityEdge>> {
        let query = Query::new(format!(
            "MATCH (source:Entity {{uuid: $source_uuid, group_id: $group_id}})\
             -[r:RELATES_TO]->\
             (target:Entity {{uuid: $target_uuid, group_id: $group_id}})
             RETURN {} ORDER BY r.created_at",
            EDGE_COLUMNS
        ))
        .param("source_uuid", source_uuid.to_string())
        .param("target_uuid", target_uuid.to_string())
        .param("group_id", group_id.to_string());

        self.fetch_edges(query).await
    }

    async fn get_recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<EpisodicNode>> {
        // RFC 3339 UTC strings compare in time order.
        let query = Query::new(format!(
            "MATCH (n:Episodic {{group_id: $group_id}})
             RETURN {} ORDER BY n.reference_time DESC LIMIT $limit",
            EPISODIC_COLUMNS
        ))
        .param("group_id", group_id.to_string())
        .param("limit", limit as i64);

        let mut result = self.graph.execute(query).await?;
        let mut episodes = Vec::new();
        while let Some(row) = result.next().await? {
            episodes.push(episodic_from_row(&row)?);
        }
        Ok(episodes)
    }

    async fn search_nodes_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>> {
        let query = Query::new(format!(
            "CALL db.index.vector.queryNodes('entity_embedding', $k, $embedding)
             YIELD node AS n, score
             WHERE n.group_id = $group_id AND score > 0.0
             RETURN {}, score ORDER BY score DESC LIMIT $limit",
            ENTITY_COLUMNS
        ))
        .param("k", (limit * 2) as i64)
        .param("embedding", embedding_param(Some(vector)))
        .param("group_id", group_id.to_string())
        .param("limit", limit as i64);

        self.fetch_scored_entities(query).await
    }

    async fn search_edges_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        let query = Query::new(format!(
            "CALL db.index.vector.queryRelationships('edge_embedding', $k, $embedding)
             YIELD relationship AS r, score
             WHERE r.group_id = $group_id AND score > 0.0
             MATCH (source:Entity)-[r]->(target:Entity)
             RETURN {}, score ORDER BY score DESC LIMIT $limit",
            EDGE_COLUMNS
        ))
        .param("k", (limit * 2) as i64)
        .param("embedding", embedding_param(Some(vector)))
        .param("group_id", group_id.to_string())
        .param("limit", limit as i64);

        self.fetch_scored_edges(query).await
    }

    async fn search_nodes_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>> {
        let sanitized = lucene_sanitize(query);
        if sanitized.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(format!(
            "CALL db.index.fulltext.queryNodes('entity_fulltext', $query_text)
             YIELD node AS n, score
             WHERE n.group_id = $group_id
             RETURN {}, score ORDER BY score DESC LIMIT $limit",
            ENTITY_COLUMNS
        ))
        .param("query_text", sanitized)
        .param("group_id", group_id.to_string())
        .param("limit", limit as i64);

        self.fetch_scored_entities(query).await
    }

    async fn search_edges_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        let sanitized = lucene_sanitize(query);
        if sanitized.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(format!(
            "CALL db.index.fulltext.queryRelationships('edge_fulltext', $query_text)
             YIELD relationship AS r, score
             WHERE r.group_id = $group_id
             MATCH (source:Entity)-[r]->(target:Entity)
             RETURN {}, score ORDER BY score DESC LIMIT $limit",
            EDGE_COLUMNS
        ))
        .param("query_text", sanitized)
        .param("group_id", group_id.to_string())
        .param("limit", limit as i64);

        self.fetch_scored_edges(query).await
    }

    async fn get_nodes_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityNode>> {
        let query = Query::new(format!(
            "MATCH (n:Entity {{group_id: $group_id}})
             WHERE n.created_at >= $start AND n.created_at < $end
             RETURN {} ORDER BY n.created_at",
            ENTITY_COLUMNS
        ))
        .param("group_id", group_id.to_string())
        .param("start", start.to_rfc3339())
        .param("end", end.to_rfc3339());

        self.fetch_entities(query).await
    }

    async fn get_edges_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityEdge>> {
        let query = Query::new(format!(
            "MATCH (source:Entity)-[r:RELATES_TO]->(target:Entity)
             WHERE r.group_id = $group_id AND r.created_at >= $start AND r.created_at < $end
             RETURN {} ORDER BY r.created_at",
            EDGE_COLUMNS
        ))
        .param("group_id", group_id.to_string())
        .param("start", start.to_rfc3339())
        .param("end", end.to_rfc3339());

        self.fetch_edges(query).await
    }

    async fn get_entity_nodes(&self, group_id: &str) -> ProviderResult<Vec<EntityNode>> {
        let query = Query::new(format!(
            "MATCH (n:Entity {{group_id: $group_id}}) RETURN {}",
            ENTITY_COLUMNS
        ))
        .param("group_id", group_id.to_string());

        self.fetch_entities(query).await
    }

    async fn get_entity_edges(&self, group_id: &str) -> ProviderResult<Vec<EntityEdge>> {
        let query = Query::new(format!(
            "MATCH (source:Entity)-[r:RELATES_TO]->(target:Entity)
             WHERE r.group_id = $group_id
             RETURN {}",
            EDGE_COLUMNS
        ))
        .param("group_id", group_id.to_string());

        self.fetch_edges(query).await
    }

    async fn get_community_nodes(&self, group_id: &str) -> ProviderResult<Vec<CommunityNode>> {
        let query = Query::new(format!(
            "MATCH (n:Community {{group_id: $group_id}}) RETURN {}",
            COMMUNITY_COLUMNS
        ))
        .param("group_id", group_id.to_string());

        let mut result = self.graph.execute(query).await?;
        let mut nodes = Vec::new();
        while let Some(row) = result.next().await? {
            nodes.push(community_from_row(&row)?);
        }
        Ok(nodes)
    }

    async fn clear(&self, group_id: &str) -> ProviderResult<()> {
        let query = Query::new("MATCH (n {group_id: $group_id}) DETACH DELETE n".to_string())
            .param("group_id", group_id.to_string());
        self.graph.run(query).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_param_shapes() {
        let vector = [0.25f32, 0.5];
        assert!(matches!(
            embedding_param(Some(&vector)),
            BoltType::List(_)
        ));
        assert!(matches!(embedding_param(None), BoltType::Null(_)));
    }

    #[test]
    fn test_edge_columns_cover_the_wire_format() {
        for property in [
            "uuid",
            "name",
            "group_id",
            "created_at",
            "fact",
            "fact_embedding",
            "episodes",
            "valid_at",
            "invalid_at",
            "expired_at",
            "attributes",
        ] {
            assert!(
                EDGE_COLUMNS.contains(property),
                "missing property {}",
                property
            );
        }
    }

    #[tokio::test]
    #[ignore] // Requires a running Bolt server
    async fn test_live_round_trip() {
        let store = BoltGraphStore::connect(BoltConfig::default()).await.unwrap();
        store.create_indices().await.unwrap();
        assert!(store.health_check().await.unwrap());
    }
}
