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

use thiserror::Error;

use crate::checkpoint::PipelineStep;

/// Base error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend conflict on ({group_id}, {name}): {message}")]
    BackendConflict {
        group_id: String,
        name: String,
        message: String,
    },

    #[error("Extraction failed for chunk {chunk_index}: {message}")]
    ExtractionFailed { chunk_index: usize, message: String },

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Checkpoint for episode {episode_uuid} is corrupt: {message}")]
    CheckpointCorruption {
        episode_uuid: String,
        message: String,
    },

    #[error("Retries exhausted for episode {episode_uuid} at step {step:?} after {attempts} attempts")]
    RetriesExhausted {
        episode_uuid: String,
        step: PipelineStep,
        attempts: u32,
    },

    #[error("Operation cancelled at step {step:?}")]
    Cancelled { step: PipelineStep },

    #[error("Timed out at step {step:?} after {seconds}s")]
    Timeout { step: PipelineStep, seconds: u64 },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("LM error: {0}")]
    Lm(#[from] LmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint store error: {0}")]
    CheckpointStore(#[from] sled::Error),
}

/// Errors surfaced by graph providers. `NotFound` is a distinct kind so
/// callers can branch on absence without string matching.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Node {uuid} not found in group {group_id}")]
    NodeNotFound { uuid: String, group_id: String },

    #[error("Edge {uuid} not found in group {group_id}")]
    EdgeNotFound { uuid: String, group_id: String },

    #[error("Conflict on ({group_id}, {name}): {message}")]
    Conflict {
        group_id: String,
        name: String,
        message: String,
    },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the failure is worth retrying at the orchestrator level.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::NodeNotFound { .. } | ProviderError::EdgeNotFound { .. }
        )
    }
}

impl From<neo4rs::Error> for ProviderError {
    fn from(e: neo4rs::Error) -> Self {
        let text = e.to_string();
        // Connection-level failures are transient from the orchestrator's
        // point of view; everything else is a backend fault.
        if text.contains("connection") || text.contains("Connection") {
            ProviderError::Unavailable(text)
        } else {
            ProviderError::Backend(text)
        }
    }
}

/// LM-specific error types
#[derive(Debug, Error)]
pub enum LmError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("LM refused to generate a response: {message}")]
    Refusal { message: String },

    #[error("LM returned an empty response: {message}")]
    EmptyResponse { message: String },

    #[error("LM output did not match the expected schema: {message}")]
    StructuredParseFailure { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },
}

impl LmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LmError::RateLimited | LmError::Http(_) | LmError::Timeout { .. }
        )
    }
}

impl EngineError {
    /// Transient errors are retried with backoff by the orchestrator;
    /// everything else surfaces to the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::BackendUnavailable(_) => true,
            EngineError::Provider(p) => p.is_transient(),
            EngineError::Lm(l) => l.is_transient(),
            _ => false,
        }
    }

    /// Stable kind tag recorded in checkpoints.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InputInvalid(_) => "input_invalid",
            EngineError::BackendUnavailable(_) => "backend_unavailable",
            EngineError::BackendConflict { .. } => "backend_conflict",
            EngineError::ExtractionFailed { .. } => "extraction_failed",
            EngineError::EmbeddingFailed(_) => "embedding_failed",
            EngineError::CheckpointCorruption { .. } => "checkpoint_corruption",
            EngineError::RetriesExhausted { .. } => "retries_exhausted",
            EngineError::Cancelled { .. } => "cancelled",
            EngineError::Timeout { .. } => "timeout",
            EngineError::Provider(_) => "provider",
            EngineError::Lm(_) => "lm",
            EngineError::Serialization(_) => "serialization",
            EngineError::Io(_) => "io",
            EngineError::CheckpointStore(_) => "checkpoint_store",
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for LM operations
pub type LmResult<T> = Result<T, LmError>;
