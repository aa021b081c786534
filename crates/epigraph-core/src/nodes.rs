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
    errors::EngineError,
    helpers::{new_uuid, utc_now},
};

/// Enumeration of different kinds of episodes that can be ingested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeSource {
    /// A conversational turn. The content should be formatted as
    /// "actor: content", e.g. "user: Hello, how are you?".
    Message,
    /// A JSON string with structured data.
    Json,
    /// Plain text.
    Text,
}

impl EpisodeSource {
    pub fn from_str(s: &str) -> Result<Self, EngineError> {
        match s.to_lowercase().as_str() {
            "message" => Ok(EpisodeSource::Message),
            "json" => Ok(EpisodeSource::Json),
            "text" => Ok(EpisodeSource::Text),
            _ => Err(EngineError::InputInvalid(format!(
                "episode source: {} not implemented",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeSource::Message => "message",
            EpisodeSource::Json => "json",
            EpisodeSource::Text => "text",
        }
    }
}

/// Common fields shared by every node kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseNode {
    pub uuid: String,
    pub name: String,
    pub group_id: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl BaseNode {
    pub fn new(name: String, group_id: String) -> Self {
        Self {
            uuid: new_uuid(),
            name,
            group_id,
            labels: Vec::new(),
            created_at: utc_now(),
        }
    }

    pub fn with_uuid(mut self, uuid: String) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

impl PartialEq for BaseNode {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl std::hash::Hash for BaseNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

/// An input record: one ingested text/json/message episode. Content is
/// immutable after ingestion; `entity_edges` accumulates the uuids of
/// facts extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodicNode {
    #[serde(flatten)]
    pub base: BaseNode,
    pub source: EpisodeSource,
    pub source_description: String,
    pub content: String,
    /// The event time the episode describes.
    pub reference_time: DateTime<Utc>,
    pub entity_edges: Vec<String>,
}

impl EpisodicNode {
    pub fn new(
        name: String,
        group_id: String,
        source: EpisodeSource,
        source_description: String,
        content: String,
        reference_time: DateTime<Utc>,
    ) -> Self {
        Self {
            base: BaseNode::new(name, group_id),
            source,
            source_description,
            content,
            reference_time,
            entity_edges: Vec::new(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.base.uuid
    }

    pub fn group_id(&self) -> &str {
        &self.base.group_id
    }
}

/// A resolved real-world thing. Unique within `(group_id, name)` after
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityNode {
    #[serde(flatten)]
    pub base: BaseNode,
    pub summary: String,
    pub name_embedding: Option<Vec<f32>>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EntityNode {
    pub fn new(name: String, group_id: String, summary: String) -> Self {
        Self {
            base: BaseNode::new(name, group_id),
            summary,
            name_embedding: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_name_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.name_embedding = Some(embedding);
        self
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn uuid(&self) -> &str {
        &self.base.uuid
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn group_id(&self) -> &str {
        &self.base.group_id
    }

    /// Union the given labels into this node's label set, preserving order
    /// of first appearance.
    pub fn union_labels(&mut self, labels: &[String]) {
        for label in labels {
            if !self.base.labels.contains(label) {
                self.base.labels.push(label.clone());
            }
        }
    }
}

/// A derived cluster summary over entity nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityNode {
    #[serde(flatten)]
    pub base: BaseNode,
    pub summary: String,
    pub name_embedding: Option<Vec<f32>>,
}

impl CommunityNode {
    pub fn new(name: String, group_id: String, summary: String) -> Self {
        Self {
            base: BaseNode::new(name, group_id),
            summary,
            name_embedding: None,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.base.uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_source_from_str() {
        assert_eq!(
            EpisodeSource::from_str("message").unwrap(),
            EpisodeSource::Message
        );
        assert_eq!(EpisodeSource::from_str("json").unwrap(), EpisodeSource::Json);
        assert_eq!(EpisodeSource::from_str("Text").unwrap(), EpisodeSource::Text);
        assert!(EpisodeSource::from_str("invalid").is_err());
    }

    #[test]
    fn test_base_node_creation() {
        let node = BaseNode::new("Test Node".to_string(), "group1".to_string());
        assert_eq!(node.name, "Test Node");
        assert_eq!(node.group_id, "group1");
        assert!(!node.uuid.is_empty());
    }

    #[test]
    fn test_uuids_are_v7() {
        let node = BaseNode::new("a".to_string(), "g".to_string());
        let parsed = uuid::Uuid::parse_str(&node.uuid).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn test_union_labels() {
        let mut node = EntityNode::new("Alice".to_string(), "g".to_string(), String::new());
        node.union_labels(&["Person".to_string()]);
        node.union_labels(&["Person".to_string(), "Employee".to_string()]);
        assert_eq!(node.base.labels, vec!["Person", "Employee"]);
    }

    #[test]
    fn test_episodic_node_creation() {
        let node = EpisodicNode::new(
            "Episode 1".to_string(),
            "group1".to_string(),
            EpisodeSource::Text,
            "Test source".to_string(),
            "Test content".to_string(),
            utc_now(),
        );

        assert_eq!(node.base.name, "Episode 1");
        assert_eq!(node.source, EpisodeSource::Text);
        assert_eq!(node.content, "Test content");
        assert!(node.entity_edges.is_empty());
    }
}
