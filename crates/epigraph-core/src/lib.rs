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

//! # Epigraph Core
//!
//! A temporal knowledge-graph ingestion and retrieval engine.
//!
//! Episodes (text, JSON records, conversational turns) stream in; the
//! engine extracts entities and facts through a language model, resolves
//! them against the existing graph, maintains bitemporal validity on every
//! fact, and serves hybrid retrieval (BM25 + dense vectors + graph
//! distance) with reciprocal-rank fusion.

pub mod checkpoint;
pub mod chunker;
pub mod community;
pub mod edges;
pub mod embedder;
pub mod engine;
pub mod errors;
pub mod extraction;
pub mod helpers;
pub mod llm;
pub mod nodes;
pub mod prompts;
pub mod provider;
pub mod resolution;
pub mod search;
pub mod temporal;

// Re-export commonly used types
pub use errors::{EngineError, LmError, ProviderError};

// Re-export traits
pub use community::CommunityBuilder;
pub use embedder::EmbedderClient;
pub use llm::LmClient;
pub use provider::GraphProvider;

// Re-export concrete types
pub use checkpoint::{Checkpoint, CheckpointStore, PipelineStep};
pub use community::ConnectedComponentBuilder;
pub use edges::{BaseEdge, CommunityEdge, EntityEdge, EpisodicEdge};
pub use embedder::{CachedEmbedderClient, OpenAiEmbedder};
pub use engine::{
    AddEpisodeOptions, AddEpisodeResults, Engine, EngineConfig, EntityTypeDef, EpisodeInput,
};
pub use llm::{LmConfig, Message, OpenAiLmClient, TokenUsage};
pub use nodes::{BaseNode, CommunityNode, EntityNode, EpisodeSource, EpisodicNode};
pub use provider::{BoltGraphStore, EmbeddedGraphStore};
pub use search::{Rerank, SearchConfig, SearchMethod, SearchResult, SearchResults};
