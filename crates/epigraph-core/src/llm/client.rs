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
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, warn};

use super::config::LmConfig;
use super::models::{Message, TokenUsage};
use crate::errors::{LmError, LmResult};

const DEFAULT_CACHE_DIR: &str = "./lm_cache";
const MULTILINGUAL_EXTRACTION_RESPONSES: &str =
    "\n\nAny extracted information should be returned in the same language as it was written in.";

/// Trait for LM clients that can generate structured responses
#[async_trait]
pub trait LmClient: Send + Sync {
    /// Generate a response. When `response_schema` is set the reply must be
    /// a JSON object matching it; mismatches surface as
    /// [`LmError::StructuredParseFailure`].
    async fn generate_response(
        &self,
        messages: &[Message],
        response_schema: Option<&str>, // JSON schema as string
        max_tokens: Option<u32>,
    ) -> LmResult<Value>;

    /// Cumulative token usage since the client was created.
    fn usage(&self) -> TokenUsage;
}

/// Base implementation for LM clients with caching and retry logic
pub struct BaseLmClient {
    pub config: LmConfig,
    pub cache: Option<sled::Db>,
}

impl BaseLmClient {
    pub fn new(config: LmConfig, cache_enabled: bool) -> LmResult<Self> {
        let cache = if cache_enabled {
            Some(
                sled::open(DEFAULT_CACHE_DIR).map_err(|e| LmError::InvalidConfig {
                    message: format!("Failed to open cache: {}", e),
                })?,
            )
        } else {
            None
        };

        Ok(Self { config, cache })
    }

    /// Clean input of invisible unicode and control characters.
    pub fn clean_input(&self, input: &str) -> String {
        let zero_width_chars = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}', '\u{2060}'];
        let mut cleaned = input.to_string();
        for ch in zero_width_chars {
            cleaned = cleaned.replace(ch, "");
        }

        cleaned
            .chars()
            .filter(|&c| (c as u32) >= 32 || c == '\n' || c == '\r' || c == '\t')
            .collect()
    }

    /// Cache key for a prepared message list.
    pub fn cache_key(&self, messages: &[Message]) -> String {
        let messages_json = serde_json::to_string(messages).unwrap_or_default();
        let key_string = format!(
            "{}:{}",
            self.config.model.as_deref().unwrap_or("default"),
            messages_json
        );

        let mut hasher = Sha256::new();
        hasher.update(key_string.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn cached_response(&self, cache_key: &str) -> Option<Value> {
        let cache = self.cache.as_ref()?;
        let bytes = cache.get(cache_key).ok().flatten()?;
        let value = serde_json::from_slice::<Value>(&bytes).ok()?;
        debug!("lm cache hit for {}", cache_key);
        Some(value)
    }

    pub async fn store_response(&self, cache_key: &str, response: &Value) {
        if let Some(cache) = &self.cache {
            if let Ok(bytes) = serde_json::to_vec(response) {
                let _ = cache.insert(cache_key, bytes);
                let _ = cache.flush_async().await;
            }
        }
    }

    /// Append the response schema to the last message and the multilingual
    /// instruction to the first, then clean everything.
    pub fn prepare_messages(
        &self,
        mut messages: Vec<Message>,
        response_schema: Option<&str>,
    ) -> Vec<Message> {
        if let Some(schema) = response_schema {
            if let Some(last_msg) = messages.last_mut() {
                last_msg.content.push_str(&format!(
                    "\n\nRespond with a JSON object in the following format:\n\n{}",
                    schema
                ));
            }
        }

        if let Some(first_msg) = messages.first_mut() {
            first_msg.content.push_str(MULTILINGUAL_EXTRACTION_RESPONSES);
        }

        for message in &mut messages {
            message.content = self.clean_input(&message.content);
        }

        messages
    }

    /// Execute with bounded exponential backoff on transient failures.
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> LmResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LmResult<T>>,
    {
        let retry_strategy = ExponentialBackoff::from_millis(5000)
            .max_delay(Duration::from_secs(120))
            .take(4);

        let retry_condition = |error: &LmError| error.is_transient();

        RetryIf::spawn(retry_strategy, operation, retry_condition)
            .await
            .map_err(|e| {
                warn!("all lm retry attempts exhausted: {:?}", e);
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BaseLmClient {
        BaseLmClient::new(LmConfig::default(), false).unwrap()
    }

    #[test]
    fn test_clean_input_strips_control_chars() {
        let client = base();
        assert_eq!(client.clean_input("a\u{200b}b\u{0007}c"), "abc");
        assert_eq!(client.clean_input("line1\nline2\ttab"), "line1\nline2\ttab");
    }

    #[test]
    fn test_prepare_messages_appends_schema() {
        let client = base();
        let messages = vec![Message::system("sys"), Message::user("extract")];
        let prepared = client.prepare_messages(messages, Some(r#"{"a": "string"}"#));

        assert!(prepared[0].content.contains("same language"));
        assert!(prepared[1].content.contains(r#"{"a": "string"}"#));
    }

    #[test]
    fn test_cache_key_depends_on_content() {
        let client = base();
        let a = client.cache_key(&[Message::user("one")]);
        let b = client.cache_key(&[Message::user("two")]);
        assert_ne!(a, b);
        assert_eq!(a, client.cache_key(&[Message::user("one")]));
    }
}
