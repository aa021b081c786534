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

//! In-process embedding cache keyed by input text.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;

use super::client::EmbedderClient;
use crate::errors::LmResult;

const DEFAULT_CACHE_CAPACITY: u64 = 100_000;

/// Wraps another embedder and memoizes its vectors. Identical inputs
/// across chunks and episodes resolve without a network call.
pub struct CachedEmbedderClient {
    inner: Arc<dyn EmbedderClient>,
    cache: Cache<String, Vec<f32>>,
}

impl CachedEmbedderClient {
    pub fn new(inner: Arc<dyn EmbedderClient>) -> Self {
        Self {
            inner,
            cache: Cache::new(DEFAULT_CACHE_CAPACITY),
        }
    }
}

#[async_trait]
impl EmbedderClient for CachedEmbedderClient {
    async fn create(&self, input_data: &str) -> LmResult<Vec<f32>> {
        if let Some(cached) = self.cache.get(input_data).await {
            return Ok(cached);
        }
        let embedding = self.inner.create(input_data).await?;
        self.cache
            .insert(input_data.to_string(), embedding.clone())
            .await;
        Ok(embedding)
    }

    async fn create_batch(&self, input_data_list: &[String]) -> LmResult<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(input_data_list.len());
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (i, input) in input_data_list.iter().enumerate() {
            match self.cache.get(input).await {
                Some(cached) => results.push(Some(cached)),
                None => {
                    results.push(None);
                    misses.push((i, input.clone()));
                }
            }
        }

        if !misses.is_empty() {
            let inputs: Vec<String> = misses.iter().map(|(_, s)| s.clone()).collect();
            let fetched = self.inner.create_batch(&inputs).await?;
            for ((index, input), embedding) in misses.into_iter().zip(fetched) {
                self.cache.insert(input, embedding.clone()).await;
                results[index] = Some(embedding);
            }
        }

        // Every slot is filled: hits above, misses just now.
        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
