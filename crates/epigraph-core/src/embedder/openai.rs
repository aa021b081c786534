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

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::warn;

use super::client::{EmbedderClient, EmbedderConfig};
use crate::errors::{LmError, LmResult};

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub base_url: Option<String>,
    pub embedder: EmbedderConfig,
}

impl Default for OpenAiEmbedderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: None,
            embedder: EmbedderConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Embedder backed by an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    config: OpenAiEmbedderConfig,
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> LmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LmError::Authentication {
                message: "API key is required".to_string(),
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LmError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            http_client,
            api_key,
            base_url,
        })
    }

    async fn embed_slice(&self, inputs: &[String]) -> LmResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.config.embedding_model.clone(),
            input: inputs.to_vec(),
            dimensions: self.config.embedder.embedding_dim,
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LmError::EmptyResponse {
                message: format!("status {}: {}", status, body),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != inputs.len() {
            return Err(LmError::EmptyResponse {
                message: format!(
                    "expected {} embeddings, got {}",
                    inputs.len(),
                    parsed.data.len()
                ),
            });
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_with_retry(&self, inputs: &[String]) -> LmResult<Vec<Vec<f32>>> {
        let retry_strategy = ExponentialBackoff::from_millis(2000)
            .max_delay(Duration::from_secs(60))
            .take(4);

        RetryIf::spawn(
            retry_strategy,
            || self.embed_slice(inputs),
            |error: &LmError| error.is_transient(),
        )
        .await
        .map_err(|e| {
            warn!("embedding retries exhausted: {:?}", e);
            e
        })
    }
}

#[async_trait]
impl EmbedderClient for OpenAiEmbedder {
    async fn create(&self, input_data: &str) -> LmResult<Vec<f32>> {
        let mut batch = self.embed_with_retry(&[input_data.to_string()]).await?;
        batch.pop().ok_or_else(|| LmError::EmptyResponse {
            message: "embedding endpoint returned no data".to_string(),
        })
    }

    async fn create_batch(&self, input_data_list: &[String]) -> LmResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(input_data_list.len());
        // The endpoint bounds request size; split oversized calls.
        for window in input_data_list.chunks(self.config.embedder.batch_size.max(1)) {
            results.extend(self.embed_with_retry(window).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.config.embedder.embedding_dim
    }
}
