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

//! Resolution of extracted candidates onto existing graph identities.
//!
//! Entities resolve once per episode, after same-name candidates from all
//! chunks have collapsed, so one real-world thing lands on one node.
//! Edges resolve afterwards against the resolved uuids.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::{
    edges::EntityEdge,
    embedder::EmbedderClient,
    errors::EngineResult,
    extraction::{call_structured, ExtractedBundle},
    helpers::{cosine_similarity, tokenize},
    llm::LmClient,
    nodes::EntityNode,
    prompts::{self, dedupe_entities::DedupeDecision, extract_edges::ExtractedEdge,
        extract_entities::ExtractedEntity},
    provider::GraphProvider,
};

/// Candidates above this cosine similarity are treated as high-confidence
/// matches; multiple such candidates tie-break to the earliest created.
pub const HIGH_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Facts on the same triple at or above this similarity are the same fact.
pub const IDENTICAL_FACT_THRESHOLD: f64 = 0.95;

const VECTOR_CANDIDATES: usize = 5;
const FULLTEXT_CANDIDATES: usize = 5;

/// Outcome of entity resolution for one episode.
#[derive(Debug, Default)]
pub struct ResolvedEntities {
    /// Every node this episode touches, new and merged alike.
    pub nodes: Vec<EntityNode>,
    /// Lowercased extracted name → resolved node uuid.
    pub name_to_uuid: HashMap<String, String>,
    /// Nodes that did not exist before this episode.
    pub created_uuids: Vec<String>,
}

/// Outcome of edge resolution for one episode.
#[derive(Debug, Default)]
pub struct ResolvedEdges {
    /// Facts that did not exist before this episode.
    pub new_edges: Vec<EntityEdge>,
    /// Existing facts re-stated by this episode, with provenance appended.
    pub reused_edges: Vec<EntityEdge>,
}

/// Collapse per-chunk extractions to one candidate list for the episode.
/// The first occurrence wins the label/span metadata.
pub fn collapse_entities(bundles: &[ExtractedBundle]) -> Vec<ExtractedEntity> {
    let mut seen = HashMap::new();
    let mut collapsed = Vec::new();
    for bundle in bundles {
        for entity in &bundle.entities {
            let key = entity.name.to_lowercase();
            if let Some(&index) = seen.get(&key) {
                // Union labels onto the first occurrence.
                let kept: &mut ExtractedEntity = &mut collapsed[index];
                if kept.label.is_none() {
                    kept.label = entity.label.clone();
                }
            } else {
                seen.insert(key, collapsed.len());
                collapsed.push(entity.clone());
            }
        }
    }
    collapsed
}

/// Resolve extracted entities against the existing graph.
pub async fn resolve_entities(
    provider: &dyn GraphProvider,
    llm: &dyn LmClient,
    embedder: Option<&dyn EmbedderClient>,
    group_id: &str,
    extracted: Vec<ExtractedEntity>,
    episode_context: &str,
    overwrite_existing: bool,
) -> EngineResult<ResolvedEntities> {
    let mut resolved = ResolvedEntities::default();
    if extracted.is_empty() {
        return Ok(resolved);
    }

    // Batch the name embeddings up front.
    let mut embedding_failed = false;
    let embeddings = match embedder {
        Some(embedder) => {
            let names: Vec<String> = extracted.iter().map(|e| e.name.clone()).collect();
            match embedder.create_batch(&names).await {
                Ok(vectors) => vectors.into_iter().map(Some).collect(),
                Err(e) => {
                    // Persist without vectors and mark for backfill rather
                    // than failing the episode.
                    warn!("name embedding failed, continuing without: {}", e);
                    embedding_failed = true;
                    vec![None; extracted.len()]
                }
            }
        }
        None => vec![None; extracted.len()],
    };

    for (entity, embedding) in extracted.into_iter().zip(embeddings) {
        // Collapsed input should be unique by name; don't resolve twice
        // if it is not.
        if resolved.name_to_uuid.contains_key(&entity.name.to_lowercase()) {
            continue;
        }
        let mut node = resolve_one_entity(
            provider,
            llm,
            group_id,
            &entity,
            embedding,
            episode_context,
            overwrite_existing,
            &mut resolved,
        )
        .await?;
        if embedding_failed && node.name_embedding.is_none() {
            node.attributes
                .insert("embedding_pending".to_string(), serde_json::Value::Bool(true));
        }
        resolved
            .name_to_uuid
            .insert(entity.name.to_lowercase(), node.uuid().to_string());
        resolved.nodes.push(node);
    }

    Ok(resolved)
}

#[allow(clippy::too_many_arguments)]
async fn resolve_one_entity(
    provider: &dyn GraphProvider,
    llm: &dyn LmClient,
    group_id: &str,
    entity: &ExtractedEntity,
    embedding: Option<Vec<f32>>,
    episode_context: &str,
    overwrite_existing: bool,
    resolved: &mut ResolvedEntities,
) -> EngineResult<EntityNode> {
    let candidates = gather_candidates(provider, group_id, &entity.name, &embedding).await?;

    let matched = pick_match(llm, entity, episode_context, &candidates, &embedding).await?;

    match matched {
        Some(mut existing) => {
            merge_into(&mut existing, entity, overwrite_existing);
            debug!("entity {} resolved to existing {}", entity.name, existing.uuid());
            Ok(existing)
        }
        None => {
            let mut node = EntityNode::new(
                entity.name.clone(),
                group_id.to_string(),
                String::new(),
            );
            if let Some(label) = &entity.label {
                node.base.labels.push(label.clone());
            }
            node.name_embedding = embedding;
            resolved.created_uuids.push(node.uuid().to_string());
            debug!("entity {} created as {}", entity.name, node.uuid());
            Ok(node)
        }
    }
}

/// Vector + fulltext candidates, merged, deduplicated, scored by cosine
/// similarity against the candidate's embedding where available.
async fn gather_candidates(
    provider: &dyn GraphProvider,
    group_id: &str,
    name: &str,
    embedding: &Option<Vec<f32>>,
) -> EngineResult<Vec<(EntityNode, f64)>> {
    let mut merged: Vec<(EntityNode, f64)> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(vector) = embedding {
        for (node, score) in provider
            .search_nodes_by_embedding(vector, group_id, VECTOR_CANDIDATES)
            .await?
        {
            if seen.insert(node.uuid().to_string()) {
                merged.push((node, score));
            }
        }
    }

    for (node, _) in provider
        .search_nodes_fulltext(name, group_id, FULLTEXT_CANDIDATES)
        .await?
    {
        if seen.insert(node.uuid().to_string()) {
            let score = match (embedding, &node.name_embedding) {
                (Some(query), Some(candidate)) => cosine_similarity(query, candidate),
                _ => 0.0,
            };
            merged.push((node, score));
        }
    }

    Ok(merged)
}

async fn pick_match(
    llm: &dyn LmClient,
    entity: &ExtractedEntity,
    episode_context: &str,
    candidates: &[(EntityNode, f64)],
    embedding: &Option<Vec<f32>>,
) -> EngineResult<Option<EntityNode>> {
    if candidates.is_empty() {
        return Ok(None);
    }

    // Exact name match short-circuits; earliest creation wins duplicates.
    let mut exact: Vec<&EntityNode> = candidates
        .iter()
        .map(|(node, _)| node)
        .filter(|node| node.name().eq_ignore_ascii_case(&entity.name))
        .collect();
    if !exact.is_empty() {
        exact.sort_by_key(|node| node.base.created_at);
        return Ok(Some(exact[0].clone()));
    }

    // Several high-similarity candidates: earliest created wins without
    // asking the LM.
    if embedding.is_some() {
        let mut high: Vec<&EntityNode> = candidates
            .iter()
            .filter(|(_, score)| *score >= HIGH_SIMILARITY_THRESHOLD)
            .map(|(node, _)| node)
            .collect();
        if high.len() > 1 {
            high.sort_by_key(|node| node.base.created_at);
            return Ok(Some(high[0].clone()));
        }
    }

    // Otherwise the LM adjudicates against the bounded candidate set.
    let neighbors: Vec<prompts::dedupe_entities::Neighbor<'_>> = candidates
        .iter()
        .map(|(node, _)| prompts::dedupe_entities::Neighbor {
            uuid: node.uuid(),
            name: node.name(),
            summary: &node.summary,
        })
        .collect();

    let context = prompts::dedupe_entities::Context {
        candidate_name: &entity.name,
        candidate_context: episode_context,
        neighbors: &neighbors,
    };

    let decision: DedupeDecision = call_structured(
        llm,
        prompts::dedupe_entities::prompt(&context),
        prompts::dedupe_entities::SCHEMA,
    )
    .await?;

    let matched = decision.matches_existing.and_then(|uuid| {
        candidates
            .iter()
            .find(|(node, _)| node.uuid() == uuid)
            .map(|(node, _)| node.clone())
    });
    Ok(matched)
}

/// Fold an extracted entity into a matched existing node. Labels union;
/// the earlier summary survives unless the new one is strictly more
/// informative; `overwrite_existing` replaces content wholesale.
fn merge_into(existing: &mut EntityNode, entity: &ExtractedEntity, overwrite_existing: bool) {
    if overwrite_existing {
        existing.base.labels = entity.label.iter().cloned().collect();
        existing.summary = String::new();
        existing.attributes.clear();
        return;
    }
    if let Some(label) = &entity.label {
        existing.union_labels(std::slice::from_ref(label));
    }
}

/// Whether `new` is strictly more informative than `old`: longer and a
/// token superset.
pub fn more_informative(new: &str, old: &str) -> bool {
    if new.len() <= old.len() {
        return false;
    }
    let new_tokens: std::collections::HashSet<String> = tokenize(new).into_iter().collect();
    tokenize(old).iter().all(|t| new_tokens.contains(t))
}

/// Keep the earlier summary unless the new one is strictly more
/// informative.
pub fn merge_summary(existing: &mut EntityNode, new_summary: &str) {
    if existing.summary.is_empty() || more_informative(new_summary, &existing.summary) {
        existing.summary = new_summary.to_string();
    }
}

fn normalize_fact(fact: &str) -> String {
    tokenize(fact).join(" ")
}

fn parse_hint(hint: &Option<String>) -> Option<DateTime<Utc>> {
    hint.as_deref().and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Resolve extracted edges against the graph after entity resolution.
pub async fn resolve_edges(
    provider: &dyn GraphProvider,
    embedder: Option<&dyn EmbedderClient>,
    group_id: &str,
    episode_uuid: &str,
    reference_time: DateTime<Utc>,
    extracted: Vec<ExtractedEdge>,
    name_to_uuid: &HashMap<String, String>,
) -> EngineResult<ResolvedEdges> {
    let mut resolved = ResolvedEdges::default();

    for extracted_edge in extracted {
        let Some(source_uuid) = name_to_uuid.get(&extracted_edge.source_name.to_lowercase())
        else {
            warn!(
                "edge {} references unresolved entity {}",
                extracted_edge.name, extracted_edge.source_name
            );
            continue;
        };
        let Some(target_uuid) = name_to_uuid.get(&extracted_edge.target_name.to_lowercase())
        else {
            warn!(
                "edge {} references unresolved entity {}",
                extracted_edge.name, extracted_edge.target_name
            );
            continue;
        };

        // The same fact stated in two chunks of this episode is one edge.
        if let Some(duplicate) = resolved.new_edges.iter_mut().find(|e| {
            e.source_node_uuid() == source_uuid
                && e.target_node_uuid() == target_uuid
                && e.name == extracted_edge.name
                && normalize_fact(&e.fact) == normalize_fact(&extracted_edge.fact)
        }) {
            duplicate.add_episode(episode_uuid);
            continue;
        }

        let fact_embedding = match embedder {
            Some(embedder) => match embedder.create(&extracted_edge.fact).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!("fact embedding failed, continuing without: {}", e);
                    None
                }
            },
            None => None,
        };

        // Candidates: existing edges on the same pair, same triple first.
        let candidates = provider
            .get_edges_between(source_uuid, target_uuid, group_id)
            .await?;

        let identical = candidates.into_iter().find(|candidate| {
            if !candidate.is_current() || candidate.name != extracted_edge.name {
                return false;
            }
            if normalize_fact(&candidate.fact) == normalize_fact(&extracted_edge.fact) {
                return true;
            }
            match (&candidate.fact_embedding, &fact_embedding) {
                (Some(a), Some(b)) => cosine_similarity(a, b) >= IDENTICAL_FACT_THRESHOLD,
                _ => false,
            }
        });

        match identical {
            Some(mut existing) => {
                existing.add_episode(episode_uuid);
                debug!("fact reused: {}", existing.fact);
                resolved.reused_edges.push(existing);
            }
            None => {
                let valid_at =
                    parse_hint(&extracted_edge.valid_at_hint).unwrap_or(reference_time);
                let mut edge = EntityEdge::new(
                    group_id.to_string(),
                    source_uuid.clone(),
                    target_uuid.clone(),
                    extracted_edge.name.clone(),
                    extracted_edge.fact.clone(),
                    valid_at,
                );
                edge.invalid_at = parse_hint(&extracted_edge.invalid_at_hint);
                if let Some(invalid_at) = edge.invalid_at {
                    if invalid_at < edge.valid_at {
                        edge.invalid_at = Some(edge.valid_at);
                    }
                }
                edge.fact_embedding = fact_embedding;
                edge.episodes.push(episode_uuid.to_string());
                if edge.fact_embedding.is_none() && embedder.is_some() {
                    edge.attributes.insert(
                        "embedding_pending".to_string(),
                        serde_json::Value::Bool(true),
                    );
                }
                resolved.new_edges.push(edge);
            }
        }
    }

    Ok(resolved)
}

/// Give freshly created nodes a summary drawn from the facts that mention
/// them, so fulltext and vector search see more than a bare name. Existing
/// summaries only move if the fact text is strictly more informative.
pub fn enrich_summaries(nodes: &mut [EntityNode], edges: &[EntityEdge]) {
    for node in nodes.iter_mut() {
        let facts: Vec<&str> = edges
            .iter()
            .filter(|e| {
                e.source_node_uuid() == node.uuid() || e.target_node_uuid() == node.uuid()
            })
            .map(|e| e.fact.as_str())
            .collect();
        if facts.is_empty() {
            continue;
        }
        let joined = facts.join(" ");
        merge_summary(node, &joined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::utc_now;

    #[test]
    fn test_more_informative() {
        assert!(more_informative(
            "Alice works at Acme as an engineer",
            "Alice works at Acme"
        ));
        assert!(!more_informative("Alice works", "Alice works at Acme"));
        // Longer but not a superset.
        assert!(!more_informative(
            "Bob founded Globex together with Carol",
            "Alice works at Acme"
        ));
    }

    #[test]
    fn test_merge_summary_keeps_earlier() {
        let mut node = EntityNode::new("Alice".into(), "g".into(), "Alice works at Acme".into());
        merge_summary(&mut node, "Alice works");
        assert_eq!(node.summary, "Alice works at Acme");

        merge_summary(&mut node, "Alice works at Acme as an engineer");
        assert_eq!(node.summary, "Alice works at Acme as an engineer");
    }

    #[test]
    fn test_collapse_entities_unions_labels() {
        let bundles = vec![
            ExtractedBundle {
                chunk_index: 0,
                entities: vec![ExtractedEntity {
                    name: "Alice".into(),
                    label: None,
                    span_hint: None,
                }],
                edges: vec![],
            },
            ExtractedBundle {
                chunk_index: 2,
                entities: vec![ExtractedEntity {
                    name: "alice".into(),
                    label: Some("Person".into()),
                    span_hint: None,
                }],
                edges: vec![],
            },
        ];

        let collapsed = collapse_entities(&bundles);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].name, "Alice");
        assert_eq!(collapsed[0].label.as_deref(), Some("Person"));
    }

    #[test]
    fn test_normalize_fact_ignores_case_and_punctuation() {
        assert_eq!(
            normalize_fact("Alice works at Acme."),
            normalize_fact("alice  works at acme")
        );
    }

    #[test]
    fn test_enrich_summaries_fills_empty() {
        let mut alice = EntityNode::new("Alice".into(), "g".into(), String::new());
        let mut acme = EntityNode::new("Acme".into(), "g".into(), String::new());
        let edge = EntityEdge::new(
            "g".into(),
            alice.uuid().to_string(),
            acme.uuid().to_string(),
            "works_at".into(),
            "Alice works at Acme.".into(),
            utc_now(),
        );
        let mut nodes = vec![alice.clone(), acme.clone()];
        enrich_summaries(&mut nodes, std::slice::from_ref(&edge));
        assert_eq!(nodes[0].summary, "Alice works at Acme.");
        assert_eq!(nodes[1].summary, "Alice works at Acme.");

        // Unrelated node stays untouched.
        alice.summary = "existing".into();
        acme.summary.clear();
        let mut nodes = vec![alice, acme];
        enrich_summaries(&mut nodes, &[]);
        assert_eq!(nodes[0].summary, "existing");
        assert_eq!(nodes[1].summary, "");
    }
}
