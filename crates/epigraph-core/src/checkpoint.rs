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

//! Checkpoint-driven pipeline state.
//!
//! Each ingestion step is a pure function from checkpoint-in to
//! checkpoint-out; resumption after a crash or retry replays from the last
//! completed step instead of relying on suspended stacks. Checkpoints are
//! persisted per episode in a sled tree, append-or-replace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::{
    chunker::Chunk,
    edges::{EntityEdge, EpisodicEdge},
    errors::{EngineError, EngineResult},
    extraction::ExtractedBundle,
    helpers::utc_now,
    nodes::{EntityNode, EpisodicNode},
};

/// Ordered pipeline steps. Each is a checkpoint boundary; the stored step
/// is the last one that completed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PipelineStep {
    Initial,
    Prepared,
    GotPreviousEpisodes,
    CreatedChunks,
    ExtractedEntities,
    DeduplicatedEntities,
    ExtractedEdges,
    ResolvedEdges,
    ExtractedAttributes,
    BuiltEpisodicEdges,
    PerformedGraphUpdate,
    UpdatedCommunities,
    Completed,
}

impl PipelineStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStep::Completed)
    }
}

/// Last error recorded against an episode's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointError {
    pub kind: String,
    pub message: String,
    pub step: PipelineStep,
}

/// Intermediate artifacts needed to resume mid-pipeline. Everything here
/// is serializable value state; no handles, no pointers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointArtifacts {
    /// The episode node as prepared, so a resume pins the same identity.
    pub episode: Option<EpisodicNode>,
    pub previous_episode_uuids: Vec<String>,
    pub chunks: Vec<Chunk>,
    /// One bundle per non-empty chunk, in chunk order.
    pub bundles: Vec<ExtractedBundle>,
    /// Entity nodes after resolution (new and reused).
    pub resolved_nodes: Vec<EntityNode>,
    /// Extracted-name → resolved node uuid.
    pub name_to_uuid: HashMap<String, String>,
    /// Uuids of nodes that did not exist before this episode.
    pub created_node_uuids: Vec<String>,
    /// Edges to persist (new facts and reused facts with fresh provenance).
    pub resolved_edges: Vec<EntityEdge>,
    /// Previously-current edges superseded by this episode.
    pub invalidated_edges: Vec<EntityEdge>,
    pub episodic_edges: Vec<EpisodicEdge>,
}

/// One checkpoint record per episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub episode_uuid: String,
    pub group_id: String,
    pub step: PipelineStep,
    pub attempt: u32,
    pub first_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<CheckpointError>,
    pub artifacts: CheckpointArtifacts,
}

impl Checkpoint {
    pub fn new(episode_uuid: String, group_id: String) -> Self {
        Self {
            episode_uuid,
            group_id,
            step: PipelineStep::Initial,
            attempt: 0,
            first_failure_at: None,
            last_error: None,
            artifacts: CheckpointArtifacts::default(),
        }
    }

    /// Record a failure at the current in-flight step. The stored `step`
    /// stays at the last completed boundary.
    pub fn record_failure(&mut self, at_step: PipelineStep, error: &EngineError) {
        if self.first_failure_at.is_none() {
            self.first_failure_at = Some(utc_now());
        }
        self.last_error = Some(CheckpointError {
            kind: error.kind().to_string(),
            message: error.to_string(),
            step: at_step,
        });
    }

    /// Whether the retry budget or TTL is spent.
    pub fn exhausted(&self, max_attempts: u32, ttl: chrono::Duration) -> bool {
        if self.attempt >= max_attempts {
            return true;
        }
        match self.first_failure_at {
            Some(first) => utc_now() - first > ttl,
            None => false,
        }
    }
}

/// Durable per-episode checkpoint storage on sled. Keys are derived from
/// the episode uuid; writes replace the previous record wholesale.
pub struct CheckpointStore {
    db: sled::Db,
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory store for tests and ephemeral engines.
    pub fn temporary() -> EngineResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn key(episode_uuid: &str) -> String {
        format!("episode/{}", episode_uuid)
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> EngineResult<()> {
        let bytes = serde_json::to_vec(checkpoint)?;
        self.db.insert(Self::key(&checkpoint.episode_uuid), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Load the checkpoint for an episode, if any. A record that cannot be
    /// deserialized is reported as corruption, not absence.
    pub fn load(&self, episode_uuid: &str) -> EngineResult<Option<Checkpoint>> {
        match self.db.get(Self::key(episode_uuid))? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                EngineError::CheckpointCorruption {
                    episode_uuid: episode_uuid.to_string(),
                    message: e.to_string(),
                }
            }),
        }
    }

    pub fn remove(&self, episode_uuid: &str) -> EngineResult<()> {
        self.db.remove(Self::key(episode_uuid))?;
        self.db.flush()?;
        Ok(())
    }

    /// Drop every checkpoint belonging to a group.
    pub fn remove_group(&self, group_id: &str) -> EngineResult<()> {
        let mut stale = Vec::new();
        for entry in self.db.scan_prefix("episode/") {
            let (key, bytes) = entry?;
            if let Ok(checkpoint) = serde_json::from_slice::<Checkpoint>(&bytes) {
                if checkpoint.group_id == group_id {
                    stale.push(key);
                }
            }
        }
        for key in stale {
            self.db.remove(key)?;
        }
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert!(PipelineStep::Initial < PipelineStep::Prepared);
        assert!(PipelineStep::ExtractedEdges < PipelineStep::ResolvedEdges);
        assert!(PipelineStep::PerformedGraphUpdate < PipelineStep::Completed);
        assert!(PipelineStep::Completed.is_terminal());
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = CheckpointStore::temporary().unwrap();
        let mut checkpoint = Checkpoint::new("ep1".to_string(), "g1".to_string());
        checkpoint.step = PipelineStep::ExtractedEdges;
        checkpoint.attempt = 2;
        store.save(&checkpoint).unwrap();

        let loaded = store.load("ep1").unwrap().unwrap();
        assert_eq!(loaded.step, PipelineStep::ExtractedEdges);
        assert_eq!(loaded.attempt, 2);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_checkpoints_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CheckpointStore::open(dir.path().join("checkpoints")).unwrap();
            let mut checkpoint = Checkpoint::new("ep1".to_string(), "g1".to_string());
            checkpoint.step = PipelineStep::CreatedChunks;
            store.save(&checkpoint).unwrap();
        }

        let reopened = CheckpointStore::open(dir.path().join("checkpoints")).unwrap();
        let loaded = reopened.load("ep1").unwrap().unwrap();
        assert_eq!(loaded.step, PipelineStep::CreatedChunks);
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let store = CheckpointStore::temporary().unwrap();
        store.db.insert("episode/ep1", b"not json".to_vec()).unwrap();

        let err = store.load("ep1").unwrap_err();
        assert!(matches!(err, EngineError::CheckpointCorruption { .. }));
    }

    #[test]
    fn test_exhaustion_by_attempts() {
        let mut checkpoint = Checkpoint::new("ep1".to_string(), "g1".to_string());
        checkpoint.attempt = 3;
        assert!(checkpoint.exhausted(3, chrono::Duration::hours(1)));
        assert!(!checkpoint.exhausted(4, chrono::Duration::hours(1)));
    }

    #[test]
    fn test_record_failure_keeps_first_failure_time() {
        let mut checkpoint = Checkpoint::new("ep1".to_string(), "g1".to_string());
        let error = EngineError::BackendUnavailable("down".to_string());
        checkpoint.record_failure(PipelineStep::ResolvedEdges, &error);
        let first = checkpoint.first_failure_at;
        assert!(first.is_some());

        checkpoint.record_failure(PipelineStep::ResolvedEdges, &error);
        assert_eq!(checkpoint.first_failure_at, first);
        let last = checkpoint.last_error.unwrap();
        assert_eq!(last.kind, "backend_unavailable");
        assert_eq!(last.step, PipelineStep::ResolvedEdges);
    }

    #[test]
    fn test_remove_group_only_touches_group() {
        let store = CheckpointStore::temporary().unwrap();
        store
            .save(&Checkpoint::new("ep1".to_string(), "g1".to_string()))
            .unwrap();
        store
            .save(&Checkpoint::new("ep2".to_string(), "g2".to_string()))
            .unwrap();

        store.remove_group("g1").unwrap();
        assert!(store.load("ep1").unwrap().is_none());
        assert!(store.load("ep2").unwrap().is_some());
    }
}
