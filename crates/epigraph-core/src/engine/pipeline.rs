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

//! The ordered ingestion pipeline.
//!
//! Every step runs only if the checkpoint has not passed it, writes its
//! artifacts into the checkpoint, and advances the recorded step. A resume
//! therefore replays exactly the steps that never completed.

use tracing::{debug, warn};

use super::{AddEpisodeOptions, AddEpisodeResults, Engine};
use crate::{
    checkpoint::{Checkpoint, PipelineStep},
    chunker,
    edges::EpisodicEdge,
    errors::{EngineError, EngineResult},
    extraction::{self, ExtractedBundle, ExtractionSettings},
    nodes::EpisodicNode,
    prompts::{self, hydrate_attributes::HydratedAttributes},
    resolution,
    temporal,
};

/// Episode-context excerpt handed to dedupe and hydration prompts.
const CONTEXT_EXCERPT_CHARS: usize = 500;

pub(crate) async fn run(
    engine: &Engine,
    episode: &EpisodicNode,
    extraction_content: &str,
    options: &AddEpisodeOptions,
    checkpoint: &mut Checkpoint,
) -> EngineResult<AddEpisodeResults> {
    // A resumed run continues with the episode exactly as first prepared.
    let episode = checkpoint
        .artifacts
        .episode
        .clone()
        .unwrap_or_else(|| episode.clone());
    let group_id = episode.group_id().to_string();
    let settings = ExtractionSettings {
        allowed_labels: options.entity_types.iter().map(|t| t.name.clone()).collect(),
        excluded_labels: options.excluded_entity_types.clone(),
        allowed_edge_names: options.edge_types.clone(),
    };

    if checkpoint.step < PipelineStep::Prepared {
        engine.check_cancelled(PipelineStep::Prepared)?;
        checkpoint.artifacts.episode = Some(episode.clone());
        advance(engine, checkpoint, PipelineStep::Prepared)?;
    }

    if checkpoint.step < PipelineStep::GotPreviousEpisodes {
        engine.check_cancelled(PipelineStep::GotPreviousEpisodes)?;
        let uuids = match &options.previous_episode_ids {
            Some(uuids) => uuids.clone(),
            None => engine
                .provider()
                .get_recent_episodes(&group_id, engine.episode_window() + 1)
                .await?
                .into_iter()
                .filter(|e| e.uuid() != episode.uuid())
                .take(engine.episode_window())
                .map(|e| e.uuid().to_string())
                .collect(),
        };
        checkpoint.artifacts.previous_episode_uuids = uuids;
        advance(engine, checkpoint, PipelineStep::GotPreviousEpisodes)?;
    }

    if checkpoint.step < PipelineStep::CreatedChunks {
        engine.check_cancelled(PipelineStep::CreatedChunks)?;
        checkpoint.artifacts.chunks =
            chunker::split(extraction_content, options.max_characters_per_chunk);
        debug!(
            "episode {} split into {} chunks",
            episode.uuid(),
            checkpoint.artifacts.chunks.len()
        );
        advance(engine, checkpoint, PipelineStep::CreatedChunks)?;
    }

    if checkpoint.step < PipelineStep::ExtractedEntities {
        engine.check_cancelled(PipelineStep::ExtractedEntities)?;
        let mut previous_episodes = Vec::new();
        for uuid in &checkpoint.artifacts.previous_episode_uuids {
            match engine.provider().get_episodic_node(uuid, &group_id).await {
                Ok(node) => previous_episodes.push(node),
                Err(e) if e.is_not_found() => {
                    debug!("previous episode {} no longer exists", uuid)
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut bundles = Vec::new();
        // Chunk order matters here: each extraction sees its predecessor's
        // tail. Chunks yielding nothing drop out of the rest of the
        // pipeline; the episode node itself is persisted regardless.
        for chunk in &checkpoint.artifacts.chunks {
            let entities = match extraction::extract_entities(
                engine.llm(),
                chunk,
                &previous_episodes,
                &settings,
            )
            .await
            {
                Ok(entities) => entities,
                Err(EngineError::ExtractionFailed { chunk_index, message }) => {
                    warn!("chunk {} extraction failed, skipping: {}", chunk_index, message);
                    continue;
                }
                Err(other) => return Err(other),
            };
            if entities.is_empty() {
                debug!("chunk {} yielded no entities, skipping", chunk.index);
                continue;
            }
            bundles.push(ExtractedBundle {
                chunk_index: chunk.index,
                entities,
                edges: Vec::new(),
            });
        }
        checkpoint.artifacts.bundles = bundles;
        advance(engine, checkpoint, PipelineStep::ExtractedEntities)?;
    }

    if checkpoint.step < PipelineStep::DeduplicatedEntities {
        engine.check_cancelled(PipelineStep::DeduplicatedEntities)?;
        let collapsed = resolution::collapse_entities(&checkpoint.artifacts.bundles);
        let context: String = extraction_content
            .chars()
            .take(CONTEXT_EXCERPT_CHARS)
            .collect();
        let resolved = resolution::resolve_entities(
            engine.provider(),
            engine.llm(),
            embedder_for(engine, options),
            &group_id,
            collapsed,
            &context,
            options.overwrite_existing,
        )
        .await?;

        checkpoint.artifacts.resolved_nodes = resolved.nodes;
        checkpoint.artifacts.name_to_uuid = resolved.name_to_uuid;
        checkpoint.artifacts.created_node_uuids = resolved.created_uuids;
        advance(engine, checkpoint, PipelineStep::DeduplicatedEntities)?;
    }

    if checkpoint.step < PipelineStep::ExtractedEdges {
        engine.check_cancelled(PipelineStep::ExtractedEdges)?;
        let reference_time = episode.reference_time.to_rfc3339();
        let mut prior_facts: Vec<String> = Vec::new();
        let chunks = checkpoint.artifacts.chunks.clone();
        // Edges may connect entities introduced in any chunk of this
        // episode, so every chunk extracts against the collapsed list.
        let episode_entities = resolution::collapse_entities(&checkpoint.artifacts.bundles);
        for bundle in &mut checkpoint.artifacts.bundles {
            let Some(chunk) = chunks.iter().find(|c| c.index == bundle.chunk_index) else {
                continue;
            };
            let edges = match extraction::extract_edges(
                engine.llm(),
                chunk,
                &episode_entities,
                &prior_facts,
                &reference_time,
                &settings,
            )
            .await
            {
                Ok(edges) => edges,
                Err(EngineError::ExtractionFailed { chunk_index, message }) => {
                    warn!("chunk {} edge extraction failed, skipping: {}", chunk_index, message);
                    continue;
                }
                Err(other) => return Err(other),
            };
            prior_facts.extend(edges.iter().map(|e| e.fact.clone()));
            bundle.edges = edges;
        }

        filter_by_edge_type_map(checkpoint, options);
        advance(engine, checkpoint, PipelineStep::ExtractedEdges)?;
    }

    if checkpoint.step < PipelineStep::ResolvedEdges {
        engine.check_cancelled(PipelineStep::ResolvedEdges)?;
        let extracted: Vec<_> = checkpoint
            .artifacts
            .bundles
            .iter()
            .flat_map(|b| b.edges.iter().cloned())
            .collect();

        let resolved = resolution::resolve_edges(
            engine.provider(),
            embedder_for(engine, options),
            &group_id,
            episode.uuid(),
            episode.reference_time,
            extracted,
            &checkpoint.artifacts.name_to_uuid,
        )
        .await?;

        // New facts may end older ones; this runs before the checkpoint is
        // written so the one-current-fact invariant holds at the boundary.
        let invalidated = temporal::invalidate_contradicted(
            engine.provider(),
            engine.llm(),
            &group_id,
            &resolved.new_edges,
        )
        .await?;

        let mut edges = resolved.new_edges;
        edges.extend(resolved.reused_edges);
        checkpoint.artifacts.resolved_edges = edges;
        checkpoint.artifacts.invalidated_edges = invalidated;
        advance(engine, checkpoint, PipelineStep::ResolvedEdges)?;
    }

    if checkpoint.step < PipelineStep::ExtractedAttributes {
        engine.check_cancelled(PipelineStep::ExtractedAttributes)?;
        hydrate_typed_attributes(engine, checkpoint, extraction_content, options).await;
        resolution::enrich_summaries(
            &mut checkpoint.artifacts.resolved_nodes,
            &checkpoint.artifacts.resolved_edges,
        );
        advance(engine, checkpoint, PipelineStep::ExtractedAttributes)?;
    }

    if checkpoint.step < PipelineStep::BuiltEpisodicEdges {
        engine.check_cancelled(PipelineStep::BuiltEpisodicEdges)?;
        let mut episode_node = checkpoint
            .artifacts
            .episode
            .clone()
            .unwrap_or_else(|| episode.clone());
        for edge in &checkpoint.artifacts.resolved_edges {
            if !episode_node.entity_edges.iter().any(|e| e == edge.uuid()) {
                episode_node.entity_edges.push(edge.uuid().to_string());
            }
        }
        checkpoint.artifacts.episodic_edges = checkpoint
            .artifacts
            .resolved_nodes
            .iter()
            .map(|node| {
                EpisodicEdge::new(
                    group_id.clone(),
                    episode_node.uuid().to_string(),
                    node.uuid().to_string(),
                )
            })
            .collect();
        checkpoint.artifacts.episode = Some(episode_node);
        advance(engine, checkpoint, PipelineStep::BuiltEpisodicEdges)?;
    }

    if checkpoint.step < PipelineStep::PerformedGraphUpdate {
        engine.check_cancelled(PipelineStep::PerformedGraphUpdate)?;
        let episode_node = checkpoint
            .artifacts
            .episode
            .clone()
            .unwrap_or_else(|| episode.clone());

        // One write scope: nodes first so edge endpoints exist, then the
        // facts (new, reused, and invalidated), then provenance.
        engine
            .provider()
            .upsert_entity_nodes(&checkpoint.artifacts.resolved_nodes)
            .await?;
        let mut all_edges = checkpoint.artifacts.resolved_edges.clone();
        all_edges.extend(checkpoint.artifacts.invalidated_edges.iter().cloned());
        engine.provider().upsert_entity_edges(&all_edges).await?;
        engine.provider().upsert_episodic_node(&episode_node).await?;
        engine
            .provider()
            .upsert_episodic_edges(&checkpoint.artifacts.episodic_edges)
            .await?;
        advance(engine, checkpoint, PipelineStep::PerformedGraphUpdate)?;
    }

    let mut communities = Vec::new();
    let mut community_edges = Vec::new();
    if checkpoint.step < PipelineStep::UpdatedCommunities {
        engine.check_cancelled(PipelineStep::UpdatedCommunities)?;
        if options.update_communities {
            // A community failure never rolls back the knowledge written
            // in the previous step.
            match rebuild_communities(engine, &group_id).await {
                Ok((nodes, edges)) => {
                    communities = nodes;
                    community_edges = edges;
                }
                Err(e) => warn!("community update failed, continuing: {}", e),
            }
        }
        advance(engine, checkpoint, PipelineStep::UpdatedCommunities)?;
    }

    checkpoint.step = PipelineStep::Completed;

    let episode_node = checkpoint
        .artifacts
        .episode
        .clone()
        .unwrap_or_else(|| episode.clone());
    let skipped_chunks =
        checkpoint.artifacts.chunks.len() - checkpoint.artifacts.bundles.len();

    Ok(AddEpisodeResults {
        episode: episode_node,
        nodes: checkpoint.artifacts.resolved_nodes.clone(),
        edges: checkpoint.artifacts.resolved_edges.clone(),
        episodic_edges: checkpoint.artifacts.episodic_edges.clone(),
        communities,
        community_edges,
        invalidated_edges: checkpoint.artifacts.invalidated_edges.clone(),
        skipped_chunks,
        token_usage: engine.usage(),
    })
}

fn advance(engine: &Engine, checkpoint: &mut Checkpoint, step: PipelineStep) -> EngineResult<()> {
    checkpoint.step = step;
    engine.checkpoints().save(checkpoint)
}

fn embedder_for<'a>(
    engine: &'a Engine,
    options: &AddEpisodeOptions,
) -> Option<&'a dyn crate::embedder::EmbedderClient> {
    if options.generate_embeddings {
        engine.embedder()
    } else {
        None
    }
}

/// Drop edges whose endpoint labels violate the declared
/// `(source label, target label)` restrictions.
fn filter_by_edge_type_map(checkpoint: &mut Checkpoint, options: &AddEpisodeOptions) {
    if options.edge_type_map.is_empty() {
        return;
    }
    let labels_by_name: std::collections::HashMap<String, Vec<String>> = checkpoint
        .artifacts
        .name_to_uuid
        .iter()
        .map(|(name, uuid)| {
            let labels = checkpoint
                .artifacts
                .resolved_nodes
                .iter()
                .find(|n| n.uuid() == uuid)
                .map(|n| n.base.labels.clone())
                .unwrap_or_default();
            (name.clone(), labels)
        })
        .collect();

    for bundle in &mut checkpoint.artifacts.bundles {
        bundle.edges.retain(|edge| {
            let Some(allowed_pairs) = options.edge_type_map.get(&edge.name) else {
                return true;
            };
            if allowed_pairs.is_empty() {
                return true;
            }
            let empty: Vec<String> = Vec::new();
            let source_labels = labels_by_name
                .get(&edge.source_name.to_lowercase())
                .unwrap_or(&empty);
            let target_labels = labels_by_name
                .get(&edge.target_name.to_lowercase())
                .unwrap_or(&empty);
            let permitted = allowed_pairs.iter().any(|(source, target)| {
                source_labels.iter().any(|l| l == source)
                    && target_labels.iter().any(|l| l == target)
            });
            if !permitted {
                warn!(
                    "discarding edge {}: ({:?} -> {:?}) not in the declared type map",
                    edge.name, source_labels, target_labels
                );
            }
            permitted
        });
    }
}

/// Hydrate structured attributes for nodes whose label carries a declared
/// schema. Failures degrade to free-form attributes, never fail the
/// episode.
async fn hydrate_typed_attributes(
    engine: &Engine,
    checkpoint: &mut Checkpoint,
    extraction_content: &str,
    options: &AddEpisodeOptions,
) {
    let typed: Vec<_> = options
        .entity_types
        .iter()
        .filter(|t| !t.fields.is_empty())
        .collect();
    if typed.is_empty() {
        return;
    }

    let evidence: String = extraction_content
        .chars()
        .take(CONTEXT_EXCERPT_CHARS * 4)
        .collect();

    for node in &mut checkpoint.artifacts.resolved_nodes {
        let Some(entity_type) = typed
            .iter()
            .find(|t| node.base.labels.iter().any(|l| l == &t.name))
        else {
            continue;
        };

        let context = prompts::hydrate_attributes::Context {
            entity_name: node.name(),
            entity_label: &entity_type.name,
            evidence_text: &evidence,
            fields: &entity_type.fields,
        };

        let hydrated: Result<HydratedAttributes, _> = extraction::call_structured(
            engine.llm(),
            prompts::hydrate_attributes::prompt(&context),
            prompts::hydrate_attributes::SCHEMA,
        )
        .await;

        match hydrated {
            Ok(response) => {
                let declared: std::collections::HashSet<&str> = entity_type
                    .fields
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect();
                for (key, value) in response.attributes {
                    if declared.contains(key.as_str()) && !value.is_null() {
                        node.attributes.insert(key, value);
                    }
                }
            }
            Err(e) => warn!(
                "attribute hydration failed for {}, keeping free-form: {}",
                node.name(),
                e
            ),
        }
    }
}

async fn rebuild_communities(
    engine: &Engine,
    group_id: &str,
) -> EngineResult<(
    Vec<crate::nodes::CommunityNode>,
    Vec<crate::edges::CommunityEdge>,
)> {
    // Replace-per-group: stale communities go first.
    for community in engine.provider().get_community_nodes(group_id).await? {
        engine
            .provider()
            .delete_node(community.uuid(), group_id)
            .await?;
    }

    let build = engine
        .community_builder()
        .build(engine.provider(), group_id)
        .await?;
    for community in &build.communities {
        engine.provider().upsert_community_node(community).await?;
    }
    for edge in &build.membership {
        engine.provider().upsert_community_edge(edge).await?;
    }
    Ok((build.communities, build.membership))
}
