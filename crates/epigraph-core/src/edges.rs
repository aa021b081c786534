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

use crate::helpers::{new_uuid, utc_now};

/// Common fields shared by every edge kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseEdge {
    pub uuid: String,
    pub group_id: String,
    pub source_node_uuid: String,
    pub target_node_uuid: String,
    pub created_at: DateTime<Utc>,
}

impl BaseEdge {
    pub fn new(group_id: String, source_node_uuid: String, target_node_uuid: String) -> Self {
        Self {
            uuid: new_uuid(),
            group_id,
            source_node_uuid,
            target_node_uuid,
            created_at: utc_now(),
        }
    }

    pub fn with_uuid(mut self, uuid: String) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

impl PartialEq for BaseEdge {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl std::hash::Hash for BaseEdge {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

/// Provenance edge from an episode to an entity it mentions (MENTIONS).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodicEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
}

impl EpisodicEdge {
    pub fn new(group_id: String, episode_uuid: String, entity_uuid: String) -> Self {
        Self {
            base: BaseEdge::new(group_id, episode_uuid, entity_uuid),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.base.uuid
    }

    pub fn episode_uuid(&self) -> &str {
        &self.base.source_node_uuid
    }

    pub fn entity_uuid(&self) -> &str {
        &self.base.target_node_uuid
    }
}

/// A fact: a directed relationship between two entities with bitemporal
/// validity. `valid_at`/`invalid_at` track event time, `created_at`/
/// `expired_at` track ingestion time. Content fields are never mutated
/// after creation; only the temporal fields and provenance move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
    pub name: String,
    pub fact: String,
    pub fact_embedding: Option<Vec<f32>>,
    /// Uuids of the episodes this fact was extracted from.
    pub episodes: Vec<String>,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EntityEdge {
    pub fn new(
        group_id: String,
        source_entity_uuid: String,
        target_entity_uuid: String,
        name: String,
        fact: String,
        valid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            base: BaseEdge::new(group_id, source_entity_uuid, target_entity_uuid),
            name,
            fact,
            fact_embedding: None,
            episodes: Vec::new(),
            valid_at,
            invalid_at: None,
            expired_at: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_fact_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.fact_embedding = Some(embedding);
        self
    }

    pub fn with_episodes(mut self, episodes: Vec<String>) -> Self {
        self.episodes = episodes;
        self
    }

    pub fn uuid(&self) -> &str {
        &self.base.uuid
    }

    pub fn group_id(&self) -> &str {
        &self.base.group_id
    }

    pub fn source_node_uuid(&self) -> &str {
        &self.base.source_node_uuid
    }

    pub fn target_node_uuid(&self) -> &str {
        &self.base.target_node_uuid
    }

    /// A current fact has not been superseded by a later extraction.
    pub fn is_current(&self) -> bool {
        self.expired_at.is_none()
    }

    /// Append episode provenance without duplicating uuids.
    pub fn add_episode(&mut self, episode_uuid: &str) {
        if !self.episodes.iter().any(|e| e == episode_uuid) {
            self.episodes.push(episode_uuid.to_string());
        }
    }

    /// Supersede this fact. `invalid_at` is clamped to the earliest known
    /// event-time end; `expired_at` records the ingestion time and, once
    /// set, is never moved.
    pub fn invalidate(&mut self, invalid_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.invalid_at = Some(match self.invalid_at {
            Some(existing) => existing.min(invalid_at),
            None => invalid_at,
        });
        if self.expired_at.is_none() {
            self.expired_at = Some(now);
        }
    }

    /// `valid_at <= invalid_at` whenever both are set.
    pub fn temporal_bounds_ok(&self) -> bool {
        match self.invalid_at {
            Some(invalid_at) => self.valid_at <= invalid_at,
            None => true,
        }
    }
}

/// Membership edge from an entity to a community (MEMBER_OF).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
}

impl CommunityEdge {
    pub fn new(group_id: String, entity_uuid: String, community_uuid: String) -> Self {
        Self {
            base: BaseEdge::new(group_id, entity_uuid, community_uuid),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.base.uuid
    }

    pub fn entity_uuid(&self) -> &str {
        &self.base.source_node_uuid
    }

    pub fn community_uuid(&self) -> &str {
        &self.base.target_node_uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn edge(valid_at: DateTime<Utc>) -> EntityEdge {
        EntityEdge::new(
            "g".to_string(),
            "source".to_string(),
            "target".to_string(),
            "works_at".to_string(),
            "Alice works at Acme.".to_string(),
            valid_at,
        )
    }

    #[test]
    fn test_new_edge_is_current() {
        let e = edge(utc_now());
        assert!(e.is_current());
        assert!(e.temporal_bounds_ok());
    }

    #[test]
    fn test_invalidate_sets_both_axes() {
        let start = utc_now();
        let mut e = edge(start);
        let end = start + Duration::days(30);
        let now = utc_now();

        e.invalidate(end, now);
        assert_eq!(e.invalid_at, Some(end));
        assert_eq!(e.expired_at, Some(now));
        assert!(!e.is_current());
        assert!(e.temporal_bounds_ok());
    }

    #[test]
    fn test_invalidate_clamps_to_earliest() {
        let start = utc_now();
        let mut e = edge(start);
        let now = utc_now();

        e.invalidate(start + Duration::days(10), now);
        let first_expiry = e.expired_at;
        e.invalidate(start + Duration::days(5), now + Duration::seconds(1));

        assert_eq!(e.invalid_at, Some(start + Duration::days(5)));
        // expired_at is set once and never moved
        assert_eq!(e.expired_at, first_expiry);
    }

    #[test]
    fn test_add_episode_dedupes() {
        let mut e = edge(utc_now());
        e.add_episode("ep1");
        e.add_episode("ep1");
        e.add_episode("ep2");
        assert_eq!(e.episodes, vec!["ep1", "ep2"]);
    }
}
