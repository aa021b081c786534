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

//! Temporal invalidation: a newly extracted fact can end the validity of
//! facts learned earlier. Event time comes from `valid_at`; ingestion
//! time from the moment the supersession is recorded.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::{
    edges::EntityEdge,
    errors::EngineResult,
    extraction::call_structured,
    helpers::utc_now,
    llm::LmClient,
    prompts::{self, judge_temporal::TemporalJudgment},
    provider::GraphProvider,
};

/// Apply contradiction judgments for every newly created edge against the
/// current edges touching either of its endpoints. Returns the superseded
/// edges with their temporal fields updated; callers persist them.
///
/// Post-invariant: among the given new edges and the group's existing
/// edges, at most one current edge remains per
/// `(source, target, name)` triple.
#[instrument(skip_all, fields(group_id = %group_id, new_edges = new_edges.len()))]
pub async fn invalidate_contradicted(
    provider: &dyn GraphProvider,
    llm: &dyn LmClient,
    group_id: &str,
    new_edges: &[EntityEdge],
) -> EngineResult<Vec<EntityEdge>> {
    if new_edges.is_empty() {
        return Ok(Vec::new());
    }

    let existing = provider.get_entity_edges(group_id).await?;
    let new_uuids: std::collections::HashSet<&str> =
        new_edges.iter().map(|e| e.uuid()).collect();

    // Uuid → updated edge, so two new facts invalidating the same old one
    // compound instead of clobbering.
    let mut updated: HashMap<String, EntityEdge> = HashMap::new();
    let now = utc_now();

    for new_edge in new_edges {
        for old_edge in existing.iter() {
            if new_uuids.contains(old_edge.uuid()) {
                continue;
            }
            let candidate = updated
                .get(old_edge.uuid())
                .cloned()
                .unwrap_or_else(|| old_edge.clone());
            if !candidate.is_current() {
                continue;
            }
            if !is_invalidation_candidate(new_edge, &candidate) {
                continue;
            }

            let same_triple = candidate.source_node_uuid() == new_edge.source_node_uuid()
                && candidate.target_node_uuid() == new_edge.target_node_uuid()
                && candidate.name == new_edge.name;

            let judgment = judge(llm, new_edge, &candidate).await?;

            // A second current fact on the same triple may not survive
            // this step, whatever the judgment said.
            if judgment.contradicts || same_triple {
                let invalid_at = judgment
                    .invalidated_at
                    .as_deref()
                    .and_then(parse_rfc3339)
                    .unwrap_or(new_edge.valid_at);
                let mut invalidated = candidate;
                invalidated.invalidate(invalid_at, now);
                debug!(
                    "fact invalidated: {:?} superseded by {:?}",
                    invalidated.fact, new_edge.fact
                );
                updated.insert(invalidated.uuid().to_string(), invalidated);
            }
        }
    }

    Ok(updated.into_values().collect())
}

/// Candidates share an endpoint with the new edge: the same pair in either
/// role, or the same relation name from the same source.
fn is_invalidation_candidate(new_edge: &EntityEdge, old_edge: &EntityEdge) -> bool {
    let same_pair = old_edge.source_node_uuid() == new_edge.source_node_uuid()
        && old_edge.target_node_uuid() == new_edge.target_node_uuid();
    let same_relation_from_source = old_edge.source_node_uuid() == new_edge.source_node_uuid()
        && old_edge.name == new_edge.name;
    same_pair || same_relation_from_source
}

async fn judge(
    llm: &dyn LmClient,
    new_edge: &EntityEdge,
    old_edge: &EntityEdge,
) -> EngineResult<TemporalJudgment> {
    let context = prompts::judge_temporal::Context {
        new_fact: &new_edge.fact,
        new_fact_valid_at: &new_edge.valid_at.to_rfc3339(),
        existing_fact: &old_edge.fact,
        existing_fact_valid_at: &old_edge.valid_at.to_rfc3339(),
    };

    call_structured(
        llm,
        prompts::judge_temporal::prompt(&context),
        prompts::judge_temporal::SCHEMA,
    )
    .await
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, target: &str, name: &str) -> EntityEdge {
        EntityEdge::new(
            "g".to_string(),
            source.to_string(),
            target.to_string(),
            name.to_string(),
            format!("{} {} {}", source, name, target),
            utc_now(),
        )
    }

    #[test]
    fn test_candidate_same_pair() {
        let new_edge = edge("a", "b", "works_at");
        let old_edge = edge("a", "b", "advises");
        assert!(is_invalidation_candidate(&new_edge, &old_edge));
    }

    #[test]
    fn test_candidate_same_relation_other_target() {
        let new_edge = edge("alice", "globex", "works_at");
        let old_edge = edge("alice", "acme", "works_at");
        assert!(is_invalidation_candidate(&new_edge, &old_edge));
    }

    #[test]
    fn test_unrelated_edges_are_not_candidates() {
        let new_edge = edge("alice", "globex", "works_at");
        let old_edge = edge("bob", "acme", "works_at");
        assert!(!is_invalidation_candidate(&new_edge, &old_edge));
    }
}
