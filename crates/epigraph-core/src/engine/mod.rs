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

//! The ingestion orchestrator: drives episodes through the checkpointed
//! pipeline, owns the retry/TTL policy and the process-wide LM semaphore,
//! and exposes the ingestion and retrieval APIs.

mod options;
mod pipeline;

pub use options::{AddEpisodeOptions, EntityTypeDef, EpisodeInput};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    checkpoint::{Checkpoint, CheckpointStore, PipelineStep},
    community::{CommunityBuilder, ConnectedComponentBuilder},
    edges::{CommunityEdge, EntityEdge, EpisodicEdge},
    embedder::EmbedderClient,
    errors::{EngineError, EngineResult, LmResult},
    helpers::DEFAULT_SEMAPHORE_LIMIT,
    llm::{LmClient, Message, TokenUsage},
    nodes::{CommunityNode, EntityNode, EpisodicNode},
    provider::GraphProvider,
    search::{self, SearchConfig, SearchResults},
};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_EPISODE_WINDOW: usize = 3;

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Checkpoint directory; `None` keeps checkpoints in a temporary tree.
    pub checkpoint_path: Option<PathBuf>,
    pub max_attempts: u32,
    /// Retries stop once this long has passed since the first failure.
    pub retry_ttl: chrono::Duration,
    /// Process-wide bound on concurrent LM calls.
    pub lm_concurrency: usize,
    /// How many recent episodes feed the extractor's context window.
    pub episode_window: usize,
    /// Wall-clock bound for one ingestion attempt.
    pub episode_deadline: std::time::Duration,
    pub store_raw_episode_content: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_ttl: chrono::Duration::hours(1),
            lm_concurrency: DEFAULT_SEMAPHORE_LIMIT,
            episode_window: DEFAULT_EPISODE_WINDOW,
            episode_deadline: std::time::Duration::from_secs(600),
            store_raw_episode_content: true,
        }
    }
}

/// Results from ingesting one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEpisodeResults {
    pub episode: EpisodicNode,
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<EntityEdge>,
    pub episodic_edges: Vec<EpisodicEdge>,
    pub communities: Vec<CommunityNode>,
    pub community_edges: Vec<CommunityEdge>,
    /// Previously-current facts superseded by this episode.
    pub invalidated_edges: Vec<EntityEdge>,
    /// Chunks dropped for yielding no entities or failing extraction.
    pub skipped_chunks: usize,
    pub token_usage: TokenUsage,
}

/// LM decorator that holds a permit from the process-wide semaphore for
/// the duration of every call, including its retries.
struct BoundedLmClient {
    inner: Arc<dyn LmClient>,
    semaphore: Arc<Semaphore>,
}

#[async_trait]
impl LmClient for BoundedLmClient {
    async fn generate_response(
        &self,
        messages: &[Message],
        response_schema: Option<&str>,
        max_tokens: Option<u32>,
    ) -> LmResult<serde_json::Value> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("lm semaphore closed");
        self.inner
            .generate_response(messages, response_schema, max_tokens)
            .await
    }

    fn usage(&self) -> TokenUsage {
        self.inner.usage()
    }
}

/// The temporal knowledge-graph engine. One instance per logical graph;
/// see the crate docs for the ownership rules.
pub struct Engine {
    provider: Arc<dyn GraphProvider>,
    llm: Arc<dyn LmClient>,
    embedder: Option<Arc<dyn EmbedderClient>>,
    community_builder: Arc<dyn CommunityBuilder>,
    checkpoints: CheckpointStore,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn GraphProvider>,
        llm: Arc<dyn LmClient>,
        embedder: Option<Arc<dyn EmbedderClient>>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let checkpoints = match &config.checkpoint_path {
            Some(path) => CheckpointStore::open(path)?,
            None => CheckpointStore::temporary()?,
        };
        let semaphore = Arc::new(Semaphore::new(config.lm_concurrency.max(1)));
        let llm = Arc::new(BoundedLmClient {
            inner: llm,
            semaphore,
        });

        Ok(Self {
            provider,
            llm,
            embedder,
            community_builder: Arc::new(ConnectedComponentBuilder),
            checkpoints,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn with_community_builder(mut self, builder: Arc<dyn CommunityBuilder>) -> Self {
        self.community_builder = builder;
        self
    }

    /// Token for cooperative cancellation of in-flight ingestion. Work
    /// stops cleanly at the next checkpoint boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Establish backend indices; idempotent.
    pub async fn build_indices(&self) -> EngineResult<()> {
        self.provider.create_indices().await?;
        Ok(())
    }

    /// Cumulative LM token usage for cost accounting.
    pub fn usage(&self) -> TokenUsage {
        self.llm.usage()
    }

    /// Ingest a batch of episodes in the given order.
    pub async fn add(
        &self,
        episodes: Vec<EpisodeInput>,
        options: &AddEpisodeOptions,
    ) -> EngineResult<Vec<AddEpisodeResults>> {
        let mut results = Vec::with_capacity(episodes.len());
        for episode in episodes {
            results.push(self.add_episode(episode, options).await?);
        }
        Ok(results)
    }

    /// Ingest a single episode through the checkpointed pipeline with
    /// bounded retries.
    #[instrument(skip_all, fields(group_id = %input.group_id, name = %input.name))]
    pub async fn add_episode(
        &self,
        input: EpisodeInput,
        options: &AddEpisodeOptions,
    ) -> EngineResult<AddEpisodeResults> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InputInvalid(
                "episode content is empty".to_string(),
            ));
        }
        if input.group_id.trim().is_empty() {
            return Err(EngineError::InputInvalid("group_id is empty".to_string()));
        }
        for entity_type in &options.entity_types {
            entity_type.validate()?;
        }

        let episode = input.into_node(self.config.store_raw_episode_content);
        let extraction_content = episode.content.clone();
        self.run_with_retries(episode, extraction_content, options)
            .await
    }

    /// Append content to an existing episode and extract from the new
    /// content only; prior provenance is preserved.
    #[instrument(skip_all, fields(episode_uuid = %episode_uuid))]
    pub async fn add_to_episode(
        &self,
        episode_uuid: &str,
        group_id: &str,
        additional_content: &str,
        options: &AddEpisodeOptions,
    ) -> EngineResult<AddEpisodeResults> {
        if additional_content.trim().is_empty() {
            return Err(EngineError::InputInvalid(
                "additional content is empty".to_string(),
            ));
        }

        let mut episode = self
            .provider
            .get_episodic_node(episode_uuid, group_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    EngineError::InputInvalid(format!("unknown episode {}", episode_uuid))
                } else {
                    EngineError::Provider(e)
                }
            })?;

        if !episode.content.is_empty() {
            episode.content.push_str("\n\n");
        }
        episode.content.push_str(additional_content);

        self.run_with_retries(episode, additional_content.to_string(), options)
            .await
    }

    async fn run_with_retries(
        &self,
        episode: EpisodicNode,
        extraction_content: String,
        options: &AddEpisodeOptions,
    ) -> EngineResult<AddEpisodeResults> {
        let episode_uuid = episode.uuid().to_string();

        let mut checkpoint = match self.checkpoints.load(&episode_uuid) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => Checkpoint::new(episode_uuid.clone(), episode.group_id().to_string()),
            Err(EngineError::CheckpointCorruption { message, .. }) => {
                warn!("checkpoint corrupt, restarting from Initial: {}", message);
                let mut fresh =
                    Checkpoint::new(episode_uuid.clone(), episode.group_id().to_string());
                fresh.attempt = 1;
                fresh
            }
            Err(other) => return Err(other),
        };

        loop {
            checkpoint.attempt += 1;

            let timed = tokio::time::timeout(
                self.config.episode_deadline,
                pipeline::run(self, &episode, &extraction_content, options, &mut checkpoint),
            )
            .await;
            let attempt = match timed {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    step: checkpoint.step,
                    seconds: self.config.episode_deadline.as_secs(),
                }),
            };

            match attempt {
                Ok(results) => {
                    self.checkpoints.remove(&episode_uuid)?;
                    info!(
                        "episode {} completed: {} nodes, {} edges, {} invalidated",
                        episode_uuid,
                        results.nodes.len(),
                        results.edges.len(),
                        results.invalidated_edges.len()
                    );
                    return Ok(results);
                }
                Err(error) => {
                    let in_flight = checkpoint.step;
                    checkpoint.record_failure(in_flight, &error);
                    self.checkpoints.save(&checkpoint)?;

                    let retryable = error.is_transient()
                        || matches!(error, EngineError::Timeout { .. });
                    if !retryable {
                        return Err(error);
                    }
                    if checkpoint.exhausted(self.config.max_attempts, self.config.retry_ttl) {
                        return Err(EngineError::RetriesExhausted {
                            episode_uuid,
                            step: checkpoint.step,
                            attempts: checkpoint.attempt,
                        });
                    }
                    warn!(
                        "episode {} attempt {} failed at {:?}, retrying: {}",
                        episode_uuid, checkpoint.attempt, checkpoint.step, error
                    );
                }
            }
        }
    }

    /// Hybrid retrieval over one group.
    pub async fn search(
        &self,
        query: &str,
        group_id: &str,
        config: &SearchConfig,
    ) -> EngineResult<SearchResults> {
        search::search(
            self.provider.as_ref(),
            self.embedder.as_deref(),
            query,
            group_id,
            config,
        )
        .await
    }

    /// Most recent episodes in a group, newest first.
    pub async fn recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> EngineResult<Vec<EpisodicNode>> {
        Ok(self.provider.get_recent_episodes(group_id, limit).await?)
    }

    /// Remove all graph state and checkpoints for a group.
    pub async fn clear_group(&self, group_id: &str) -> EngineResult<()> {
        self.provider.clear(group_id).await?;
        self.checkpoints.remove_group(group_id)?;
        Ok(())
    }

    pub async fn close(&self) -> EngineResult<()> {
        self.cancel.cancel();
        self.provider.close().await?;
        Ok(())
    }

    // Internal accessors for the pipeline module.

    pub(crate) fn provider(&self) -> &dyn GraphProvider {
        self.provider.as_ref()
    }

    pub(crate) fn llm(&self) -> &dyn LmClient {
        self.llm.as_ref()
    }

    pub(crate) fn embedder(&self) -> Option<&dyn EmbedderClient> {
        self.embedder.as_deref()
    }

    pub(crate) fn community_builder(&self) -> &dyn CommunityBuilder {
        self.community_builder.as_ref()
    }

    pub(crate) fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub(crate) fn episode_window(&self) -> usize {
        self.config.episode_window
    }

    pub(crate) fn check_cancelled(&self, step: PipelineStep) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled { step })
        } else {
            Ok(())
        }
    }
}
