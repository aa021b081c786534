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

//! Per-chunk entity and edge extraction through the LM.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    chunker::Chunk,
    errors::{EngineError, EngineResult, LmError},
    llm::{LmClient, Message},
    nodes::EpisodicNode,
    prompts::{self, extract_edges::ExtractedEdge, extract_entities::ExtractedEntity},
};

/// Candidate entities and edges from one chunk. Edges reference entities
/// by local name; the resolver substitutes uuids later.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedBundle {
    pub chunk_index: usize,
    pub entities: Vec<ExtractedEntity>,
    pub edges: Vec<ExtractedEdge>,
}

impl ExtractedBundle {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Issue a structured call and parse the reply into `T`. A schema
/// mismatch gets exactly one strict reprompt before surfacing.
pub async fn call_structured<T: DeserializeOwned>(
    llm: &dyn LmClient,
    messages: Vec<Message>,
    schema: &str,
) -> EngineResult<T> {
    match call_once::<T>(llm, &messages, schema).await {
        Ok(parsed) => Ok(parsed),
        Err(EngineError::Lm(LmError::StructuredParseFailure { message })) => {
            debug!("schema mismatch, issuing strict reprompt: {}", message);
            let mut strict = messages;
            if let Some(last) = strict.last_mut() {
                last.content.push_str(prompts::STRICT_REPROMPT);
            }
            call_once::<T>(llm, &strict, schema).await
        }
        Err(other) => Err(other),
    }
}

async fn call_once<T: DeserializeOwned>(
    llm: &dyn LmClient,
    messages: &[Message],
    schema: &str,
) -> EngineResult<T> {
    let value = llm
        .generate_response(messages, Some(schema), None)
        .await?;
    serde_json::from_value(value).map_err(|e| {
        EngineError::Lm(LmError::StructuredParseFailure {
            message: e.to_string(),
        })
    })
}

/// Extraction inputs shared across the chunks of one episode.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSettings {
    pub allowed_labels: Vec<String>,
    pub excluded_labels: Vec<String>,
    pub allowed_edge_names: Vec<String>,
}

/// Extract candidate entities from one chunk. Duplicate names inside the
/// chunk collapse; excluded labels are dropped even if the LM returns them.
pub async fn extract_entities(
    llm: &dyn LmClient,
    chunk: &Chunk,
    recent_episodes: &[EpisodicNode],
    settings: &ExtractionSettings,
) -> EngineResult<Vec<ExtractedEntity>> {
    let recent: Vec<String> = recent_episodes
        .iter()
        .map(|e| e.content.clone())
        .collect();

    let context = prompts::extract_entities::Context {
        chunk_text: &chunk.body,
        prior_chunk_tail: &chunk.prior_tail,
        recent_episodes: &recent,
        allowed_labels: &settings.allowed_labels,
        excluded_labels: &settings.excluded_labels,
    };

    let response: prompts::extract_entities::ExtractedEntitiesResponse = call_structured(
        llm,
        prompts::extract_entities::prompt(&context),
        prompts::extract_entities::SCHEMA,
    )
    .await
    .map_err(|e| chunk_failure(chunk.index, e))?;

    let mut seen = std::collections::HashSet::new();
    let mut entities = Vec::new();
    for entity in response.extracted_entities {
        if entity.name.trim().is_empty() {
            continue;
        }
        if let Some(label) = &entity.label {
            if settings.excluded_labels.iter().any(|l| l == label) {
                debug!("dropping entity {} with excluded label {}", entity.name, label);
                continue;
            }
        }
        if seen.insert(entity.name.to_lowercase()) {
            entities.push(entity);
        }
    }
    Ok(entities)
}

/// Extract candidate edges from one chunk against its extracted entities.
/// Edges with an endpoint that matches no entity are discarded with a
/// warning; disallowed relation names are discarded likewise.
pub async fn extract_edges(
    llm: &dyn LmClient,
    chunk: &Chunk,
    entities: &[ExtractedEntity],
    prior_facts: &[String],
    reference_time: &str,
    settings: &ExtractionSettings,
) -> EngineResult<Vec<ExtractedEdge>> {
    if entities.is_empty() {
        return Ok(Vec::new());
    }

    let entity_names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();

    let context = prompts::extract_edges::Context {
        chunk_text: &chunk.body,
        prior_chunk_tail: &chunk.prior_tail,
        entity_names: &entity_names,
        prior_facts,
        allowed_edge_names: &settings.allowed_edge_names,
        reference_time,
    };

    let response: prompts::extract_edges::ExtractedEdgesResponse = call_structured(
        llm,
        prompts::extract_edges::prompt(&context),
        prompts::extract_edges::SCHEMA,
    )
    .await
    .map_err(|e| chunk_failure(chunk.index, e))?;

    let known: std::collections::HashSet<String> =
        entity_names.iter().map(|n| n.to_lowercase()).collect();

    let mut edges = Vec::new();
    for edge in response.edges {
        if !known.contains(&edge.source_name.to_lowercase())
            || !known.contains(&edge.target_name.to_lowercase())
        {
            warn!(
                "discarding edge {}: endpoint not among extracted entities ({} -> {})",
                edge.name, edge.source_name, edge.target_name
            );
            continue;
        }
        if !settings.allowed_edge_names.is_empty()
            && !settings.allowed_edge_names.iter().any(|n| n == &edge.name)
        {
            warn!("discarding edge with disallowed relation name {}", edge.name);
            continue;
        }
        edges.push(edge);
    }
    Ok(edges)
}

fn chunk_failure(chunk_index: usize, error: EngineError) -> EngineError {
    match error {
        EngineError::Lm(LmError::StructuredParseFailure { message }) => {
            EngineError::ExtractionFailed {
                chunk_index,
                message,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    use crate::llm::TokenUsage;

    /// LM stub that replays a scripted list of responses.
    struct ScriptedLm {
        responses: Mutex<Vec<Value>>,
    }

    impl ScriptedLm {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LmClient for ScriptedLm {
        async fn generate_response(
            &self,
            _messages: &[Message],
            _response_schema: Option<&str>,
            _max_tokens: Option<u32>,
        ) -> crate::errors::LmResult<Value> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LmError::EmptyResponse {
                    message: "script exhausted".to_string(),
                });
            }
            Ok(responses.remove(0))
        }

        fn usage(&self) -> TokenUsage {
            TokenUsage::default()
        }
    }

    fn chunk(body: &str) -> Chunk {
        Chunk {
            index: 0,
            total: 1,
            body: body.to_string(),
            prior_tail: String::new(),
        }
    }

    #[tokio::test]
    async fn test_extract_entities_dedupes_and_filters() {
        let llm = ScriptedLm::new(vec![json!({
            "extracted_entities": [
                {"name": "Alice", "label": "Person"},
                {"name": "alice", "label": "Person"},
                {"name": "Acme", "label": "Organization"},
                {"name": "Tuesday", "label": "Date"},
            ]
        })]);
        let settings = ExtractionSettings {
            excluded_labels: vec!["Date".to_string()],
            ..Default::default()
        };

        let entities = extract_entities(&llm, &chunk("Alice works at Acme."), &[], &settings)
            .await
            .unwrap();

        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Acme"]);
    }

    #[tokio::test]
    async fn test_extract_edges_discards_dangling() {
        let llm = ScriptedLm::new(vec![json!({
            "edges": [
                {"source_name": "Alice", "target_name": "Acme",
                 "name": "works_at", "fact": "Alice works at Acme."},
                {"source_name": "Alice", "target_name": "Globex",
                 "name": "works_at", "fact": "dangling"},
            ]
        })]);
        let entities = vec![
            ExtractedEntity {
                name: "Alice".to_string(),
                label: None,
                span_hint: None,
            },
            ExtractedEntity {
                name: "Acme".to_string(),
                label: None,
                span_hint: None,
            },
        ];

        let edges = extract_edges(
            &llm,
            &chunk("Alice works at Acme."),
            &entities,
            &[],
            "2024-01-01T00:00:00Z",
            &ExtractionSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].name, "works_at");
    }

    #[tokio::test]
    async fn test_strict_reprompt_recovers_schema_mismatch() {
        // First reply is shaped wrong, second is valid.
        let llm = ScriptedLm::new(vec![
            json!({"wrong": true}),
            json!({"extracted_entities": [{"name": "Alice"}]}),
        ]);

        let entities = extract_entities(
            &llm,
            &chunk("Alice."),
            &[],
            &ExtractionSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(entities.len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_mismatch_is_extraction_failed() {
        let llm = ScriptedLm::new(vec![json!({"wrong": 1}), json!({"wrong": 2})]);

        let err = extract_entities(
            &llm,
            &chunk("Alice."),
            &[],
            &ExtractionSettings::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::ExtractionFailed { chunk_index: 0, .. }));
    }
}
