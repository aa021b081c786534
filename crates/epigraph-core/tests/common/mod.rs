//! Test doubles shared by the integration tests: a rule-driven LM, a
//! deterministic bag-of-words embedder, and a fault-injecting provider.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use epigraph_core::{
    edges::{CommunityEdge, EntityEdge, EpisodicEdge},
    errors::{LmError, LmResult, ProviderResult},
    helpers::{normalize_l2, tokenize},
    llm::{LmClient, Message, TokenUsage},
    nodes::{CommunityNode, EntityNode, EpisodicNode},
    EmbedderClient, EmbeddedGraphStore, Engine, EngineConfig, GraphProvider,
};

/// A deterministic fact-extraction rule: when a chunk contains `trigger`,
/// the fake LM reports the corresponding edge.
#[derive(Debug, Clone)]
pub struct FactRule {
    pub trigger: &'static str,
    pub source: &'static str,
    pub target: &'static str,
    pub name: &'static str,
    pub fact: &'static str,
    pub valid_at_hint: Option<&'static str>,
}

impl FactRule {
    pub fn new(
        trigger: &'static str,
        source: &'static str,
        target: &'static str,
        name: &'static str,
        fact: &'static str,
    ) -> Self {
        Self {
            trigger,
            source,
            target,
            name,
            fact,
            valid_at_hint: None,
        }
    }
}

/// Facts matching `new_contains` contradict facts matching
/// `existing_contains`.
#[derive(Debug, Clone)]
pub struct ContradictionRule {
    pub new_contains: &'static str,
    pub existing_contains: &'static str,
}

/// Rule-driven LM stand-in. Routing keys off the XML-tagged context
/// blocks each prompt carries.
#[derive(Default)]
pub struct FakeLm {
    pub lexicon: Vec<String>,
    pub fact_rules: Vec<FactRule>,
    pub contradictions: Vec<ContradictionRule>,
    pub entity_calls: AtomicUsize,
    pub edge_calls: AtomicUsize,
    pub dedupe_calls: AtomicUsize,
    pub judge_calls: AtomicUsize,
    pub total_calls: AtomicUsize,
}

impl FakeLm {
    pub fn with_lexicon(names: &[&str]) -> Self {
        Self {
            lexicon: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn rule(mut self, rule: FactRule) -> Self {
        self.fact_rules.push(rule);
        self
    }

    pub fn contradiction(mut self, rule: ContradictionRule) -> Self {
        self.contradictions.push(rule);
        self
    }
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let Some(from) = text.find(start) else {
        return "";
    };
    let rest = &text[from + start.len()..];
    match rest.find(end) {
        Some(to) => rest[..to].trim(),
        None => rest.trim(),
    }
}

#[async_trait]
impl LmClient for FakeLm {
    async fn generate_response(
        &self,
        messages: &[Message],
        _response_schema: Option<&str>,
        _max_tokens: Option<u32>,
    ) -> LmResult<Value> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if prompt.contains("<ALLOWED ENTITY LABELS>") {
            self.entity_calls.fetch_add(1, Ordering::SeqCst);
            let text = between(prompt, "<CURRENT TEXT>", "</CURRENT TEXT>");
            let entities: Vec<Value> = self
                .lexicon
                .iter()
                .filter(|name| text.contains(name.as_str()))
                .map(|name| json!({"name": name, "label": "Entity"}))
                .collect();
            return Ok(json!({ "extracted_entities": entities }));
        }

        if prompt.contains("<ALLOWED RELATION NAMES>") {
            self.edge_calls.fetch_add(1, Ordering::SeqCst);
            let text = between(prompt, "<CURRENT TEXT>", "</CURRENT TEXT>");
            let edges: Vec<Value> = self
                .fact_rules
                .iter()
                .filter(|rule| text.contains(rule.trigger))
                .map(|rule| {
                    json!({
                        "source_name": rule.source,
                        "target_name": rule.target,
                        "name": rule.name,
                        "fact": rule.fact,
                        "valid_at_hint": rule.valid_at_hint,
                    })
                })
                .collect();
            return Ok(json!({ "edges": edges }));
        }

        if prompt.contains("<NEW ENTITY>") {
            self.dedupe_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({"matches_existing": null, "merge_or_keep": "keep"}));
        }

        if prompt.contains("<NEW FACT>") {
            self.judge_calls.fetch_add(1, Ordering::SeqCst);
            let new_fact = between(prompt, "<NEW FACT>", "(became");
            let existing_fact = between(prompt, "<EXISTING FACT>", "(became");
            let contradicts = self.contradictions.iter().any(|rule| {
                new_fact.contains(rule.new_contains)
                    && existing_fact.contains(rule.existing_contains)
            });
            return Ok(json!({"contradicts": contradicts, "invalidated_at": null}));
        }

        if prompt.contains("<ATTRIBUTE SCHEMA>") {
            return Ok(json!({"attributes": {}}));
        }

        Err(LmError::EmptyResponse {
            message: "unrecognized prompt".to_string(),
        })
    }

    fn usage(&self) -> TokenUsage {
        let calls = self.total_calls.load(Ordering::SeqCst) as u64;
        TokenUsage::new(calls * 100, calls * 20)
    }
}

/// Bag-of-words embedder: tokens hash into a fixed number of buckets, the
/// vector is L2-normalized. Deterministic across processes, non-negative,
/// so shared vocabulary means strictly positive cosine similarity.
pub struct HashedBagEmbedder;

const EMBED_DIM: usize = 64;

#[async_trait]
impl EmbedderClient for HashedBagEmbedder {
    async fn create(&self, input_data: &str) -> LmResult<Vec<f32>> {
        let mut vector = vec![0.0f32; EMBED_DIM];
        for token in tokenize(input_data) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = (digest[0] as usize) % EMBED_DIM;
            vector[bucket] += 1.0;
        }
        Ok(normalize_l2(&vector))
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }
}

/// Provider wrapper that fails `get_edges_between` a configured number of
/// times with a transient error, then behaves normally. Exercises the
/// checkpoint-resume path at the edge-resolution step.
pub struct FlakyProvider {
    inner: EmbeddedGraphStore,
    edges_between_failures: AtomicUsize,
}

impl FlakyProvider {
    pub fn failing_edges_between(times: usize) -> Self {
        Self {
            inner: EmbeddedGraphStore::new(),
            edges_between_failures: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl GraphProvider for FlakyProvider {
    async fn create_indices(&self) -> ProviderResult<()> {
        self.inner.create_indices().await
    }

    async fn health_check(&self) -> ProviderResult<bool> {
        self.inner.health_check().await
    }

    async fn close(&self) -> ProviderResult<()> {
        self.inner.close().await
    }

    async fn get_entity_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityNode> {
        self.inner.get_entity_node(uuid, group_id).await
    }

    async fn get_episodic_node(&self, uuid: &str, group_id: &str) -> ProviderResult<EpisodicNode> {
        self.inner.get_episodic_node(uuid, group_id).await
    }

    async fn get_community_node(
        &self,
        uuid: &str,
        group_id: &str,
    ) -> ProviderResult<CommunityNode> {
        self.inner.get_community_node(uuid, group_id).await
    }

    async fn upsert_entity_node(&self, node: &EntityNode) -> ProviderResult<()> {
        self.inner.upsert_entity_node(node).await
    }

    async fn upsert_episodic_node(&self, node: &EpisodicNode) -> ProviderResult<()> {
        self.inner.upsert_episodic_node(node).await
    }

    async fn upsert_community_node(&self, node: &CommunityNode) -> ProviderResult<()> {
        self.inner.upsert_community_node(node).await
    }

    async fn delete_node(&self, uuid: &str, group_id: &str) -> ProviderResult<()> {
        self.inner.delete_node(uuid, group_id).await
    }

    async fn get_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<EntityEdge> {
        self.inner.get_entity_edge(uuid, group_id).await
    }

    async fn upsert_entity_edge(&self, edge: &EntityEdge) -> ProviderResult<()> {
        self.inner.upsert_entity_edge(edge).await
    }

    async fn delete_entity_edge(&self, uuid: &str, group_id: &str) -> ProviderResult<()> {
        self.inner.delete_entity_edge(uuid, group_id).await
    }

    async fn upsert_episodic_edge(&self, edge: &EpisodicEdge) -> ProviderResult<()> {
        self.inner.upsert_episodic_edge(edge).await
    }

    async fn upsert_community_edge(&self, edge: &CommunityEdge) -> ProviderResult<()> {
        self.inner.upsert_community_edge(edge).await
    }

    async fn upsert_entity_nodes(&self, nodes: &[EntityNode]) -> ProviderResult<()> {
        self.inner.upsert_entity_nodes(nodes).await
    }

    async fn upsert_entity_edges(&self, edges: &[EntityEdge]) -> ProviderResult<()> {
        self.inner.upsert_entity_edges(edges).await
    }

    async fn upsert_episodic_edges(&self, edges: &[EpisodicEdge]) -> ProviderResult<()> {
        self.inner.upsert_episodic_edges(edges).await
    }

    async fn get_neighbors(
        &self,
        uuid: &str,
        group_id: &str,
        max_distance: usize,
    ) -> ProviderResult<Vec<EntityNode>> {
        self.inner.get_neighbors(uuid, group_id, max_distance).await
    }

    async fn get_edges_between(
        &self,
        source_uuid: &str,
        target_uuid: &str,
        group_id: &str,
    ) -> ProviderResult<Vec<EntityEdge>> {
        let remaining = self.edges_between_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.edges_between_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(epigraph_core::ProviderError::Unavailable(
                "injected outage".to_string(),
            ));
        }
        self.inner
            .get_edges_between(source_uuid, target_uuid, group_id)
            .await
    }

    async fn get_recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<EpisodicNode>> {
        self.inner.get_recent_episodes(group_id, limit).await
    }

    async fn search_nodes_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>> {
        self.inner
            .search_nodes_by_embedding(vector, group_id, limit)
            .await
    }

    async fn search_edges_by_embedding(
        &self,
        vector: &[f32],
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        self.inner
            .search_edges_by_embedding(vector, group_id, limit)
            .await
    }

    async fn search_nodes_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityNode, f64)>> {
        self.inner.search_nodes_fulltext(query, group_id, limit).await
    }

    async fn search_edges_fulltext(
        &self,
        query: &str,
        group_id: &str,
        limit: usize,
    ) -> ProviderResult<Vec<(EntityEdge, f64)>> {
        self.inner.search_edges_fulltext(query, group_id, limit).await
    }

    async fn get_nodes_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityNode>> {
        self.inner.get_nodes_in_time_range(group_id, start, end).await
    }

    async fn get_edges_in_time_range(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<EntityEdge>> {
        self.inner.get_edges_in_time_range(group_id, start, end).await
    }

    async fn get_entity_nodes(&self, group_id: &str) -> ProviderResult<Vec<EntityNode>> {
        self.inner.get_entity_nodes(group_id).await
    }

    async fn get_entity_edges(&self, group_id: &str) -> ProviderResult<Vec<EntityEdge>> {
        self.inner.get_entity_edges(group_id).await
    }

    async fn get_community_nodes(&self, group_id: &str) -> ProviderResult<Vec<CommunityNode>> {
        self.inner.get_community_nodes(group_id).await
    }

    async fn clear(&self, group_id: &str) -> ProviderResult<()> {
        self.inner.clear(group_id).await
    }
}

/// The Alice/Acme/Globex employment storyline used across the scenarios.
pub fn workplace_lm() -> FakeLm {
    FakeLm::with_lexicon(&["Alice", "Acme", "Globex"])
        .rule(FactRule::new(
            "works at Acme",
            "Alice",
            "Acme",
            "works_at",
            "Alice works at Acme.",
        ))
        .rule(FactRule::new(
            "joined Globex",
            "Alice",
            "Globex",
            "works_at",
            "Alice works at Globex.",
        ))
        .contradiction(ContradictionRule {
            new_contains: "Globex",
            existing_contains: "Acme",
        })
}

/// Engine over an embedded store with the given fake LM.
pub fn engine_with(lm: FakeLm) -> (Arc<EmbeddedGraphStore>, Engine) {
    let provider = Arc::new(EmbeddedGraphStore::new());
    let engine = Engine::new(
        provider.clone() as Arc<dyn GraphProvider>,
        Arc::new(lm),
        Some(Arc::new(HashedBagEmbedder)),
        EngineConfig::default(),
    )
    .expect("engine construction");
    (provider, engine)
}

/// Engine over an arbitrary provider with the given fake LM.
pub fn engine_over(provider: Arc<dyn GraphProvider>, lm: Arc<FakeLm>) -> Engine {
    Engine::new(
        provider,
        lm,
        Some(Arc::new(HashedBagEmbedder)),
        EngineConfig::default(),
    )
    .expect("engine construction")
}
