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
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::client::{BaseLmClient, LmClient};
use super::config::LmConfig;
use super::models::{Message, TokenUsage};
use crate::errors::{LmError, LmResult};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

/// LM client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiLmClient {
    base_client: BaseLmClient,
    http_client: Client,
    base_url: String,
    api_key: String,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl OpenAiLmClient {
    pub fn new(config: LmConfig, cache_enabled: bool) -> LmResult<Self> {
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

        let base_client = BaseLmClient::new(config, cache_enabled)?;

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LmError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            base_client,
            http_client,
            base_url,
            api_key,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }

    async fn call_once(&self, messages: &[Message], max_tokens: Option<u32>) -> LmResult<Value> {
        let model = self
            .base_client
            .config
            .model
            .as_deref()
            .unwrap_or(DEFAULT_MODEL);

        let request = ChatRequest {
            model: model.to_string(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: self.base_client.config.temperature,
            max_tokens: max_tokens.unwrap_or(self.base_client.config.max_tokens),
            response_format: Some(json!({"type": "json_object"})),
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LmError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LmError::Authentication {
                message: format!("status {}", status),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LmError::EmptyResponse {
                message: format!("status {}: {}", status, body),
            });
        }

        let parsed: ChatResponse = response.json().await?;

        if let Some(usage) = &parsed.usage {
            self.prompt_tokens
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.completion_tokens
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LmError::EmptyResponse {
                message: "no choices in response".to_string(),
            })?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LmError::Refusal { message: refusal });
        }

        let content = choice
            .message
            .content
            .ok_or_else(|| LmError::EmptyResponse {
                message: "no content in response".to_string(),
            })?;

        serde_json::from_str(&content).map_err(|e| {
            warn!("lm returned non-json content: {}", e);
            LmError::StructuredParseFailure {
                message: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl LmClient for OpenAiLmClient {
    async fn generate_response(
        &self,
        messages: &[Message],
        response_schema: Option<&str>,
        max_tokens: Option<u32>,
    ) -> LmResult<Value> {
        let prepared = self
            .base_client
            .prepare_messages(messages.to_vec(), response_schema);

        let cache_key = self.base_client.cache_key(&prepared);
        if let Some(cached) = self.base_client.cached_response(&cache_key) {
            return Ok(cached);
        }

        let response = self
            .base_client
            .execute_with_retry(|| self.call_once(&prepared, max_tokens))
            .await?;

        self.base_client.store_response(&cache_key, &response).await;
        Ok(response)
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}
