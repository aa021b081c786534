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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    chunker::DEFAULT_MAX_CHARACTERS,
    errors::{EngineError, EngineResult},
    helpers::utc_now,
    nodes::{BaseNode, EpisodeSource, EpisodicNode},
    prompts::hydrate_attributes::AttributeField,
};

/// Attribute names reserved by the data model; declared schemas may not
/// shadow them.
const PROTECTED_ATTRIBUTES: &[&str] = &[
    "uuid",
    "name",
    "group_id",
    "labels",
    "created_at",
    "summary",
    "name_embedding",
];

/// A declared entity type: a label plus an optional attribute schema that
/// drives structured hydration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityTypeDef {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub fields: Vec<AttributeField>,
}

impl EntityTypeDef {
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InputInvalid(
                "entity type name is empty".to_string(),
            ));
        }
        for field in &self.fields {
            if PROTECTED_ATTRIBUTES.contains(&field.name.as_str()) {
                return Err(EngineError::InputInvalid(format!(
                    "{} cannot be used as an attribute for {} as it is a protected attribute name",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Options for [`crate::engine::Engine::add`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEpisodeOptions {
    /// Allowed entity labels with optional attribute schemas; empty means
    /// open schema.
    pub entity_types: Vec<EntityTypeDef>,
    /// Labels to suppress even under an open schema.
    pub excluded_entity_types: Vec<String>,
    /// Overrides the default recent-episode context window.
    pub previous_episode_ids: Option<Vec<String>>,
    /// Allowed relation names; empty means open schema.
    pub edge_types: Vec<String>,
    /// Relation name → allowed `(source label, target label)` pairs.
    pub edge_type_map: HashMap<String, Vec<(String, String)>>,
    /// Replace content of a same-named entity instead of merging.
    pub overwrite_existing: bool,
    pub generate_embeddings: bool,
    pub max_characters_per_chunk: usize,
    pub update_communities: bool,
}

impl Default for AddEpisodeOptions {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            excluded_entity_types: Vec::new(),
            previous_episode_ids: None,
            edge_types: Vec::new(),
            edge_type_map: HashMap::new(),
            overwrite_existing: false,
            generate_embeddings: true,
            max_characters_per_chunk: DEFAULT_MAX_CHARACTERS,
            update_communities: false,
        }
    }
}

/// One episode to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInput {
    /// Caller-chosen uuid; generated when absent.
    pub uuid: Option<String>,
    pub name: String,
    pub content: String,
    pub source: EpisodeSource,
    pub source_description: String,
    pub group_id: String,
    /// Event time the episode describes; ingestion time when absent.
    pub reference_time: Option<DateTime<Utc>>,
}

impl EpisodeInput {
    pub fn new(name: impl Into<String>, content: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            uuid: None,
            name: name.into(),
            content: content.into(),
            source: EpisodeSource::Text,
            source_description: String::new(),
            group_id: group_id.into(),
            reference_time: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_source(mut self, source: EpisodeSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_reference_time(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = Some(reference_time);
        self
    }

    pub(crate) fn into_node(self, store_raw_content: bool) -> EpisodicNode {
        let reference_time = self.reference_time.unwrap_or_else(utc_now);
        let mut base = BaseNode::new(self.name, self.group_id);
        if let Some(uuid) = self.uuid {
            base = base.with_uuid(uuid);
        }
        EpisodicNode {
            base,
            source: self.source,
            source_description: self.source_description,
            content: if store_raw_content {
                self.content
            } else {
                String::new()
            },
            reference_time,
            entity_edges: Vec::new(),
        }
    }
}
