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

use crate::errors::LmResult;

pub const EMBEDDING_DIM: usize = 1024;
pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub embedding_dim: usize,
    /// Oversized batch calls are split at this size.
    pub batch_size: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            embedding_dim: EMBEDDING_DIM,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Trait for embedding text into fixed-dimension vectors
#[async_trait]
pub trait EmbedderClient: Send + Sync {
    /// Embed a single text input
    async fn create(&self, input_data: &str) -> LmResult<Vec<f32>>;

    /// Embed multiple text inputs. The default walks the inputs one by
    /// one; implementations override this with real batching.
    async fn create_batch(&self, input_data_list: &[String]) -> LmResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(input_data_list.len());
        for input in input_data_list {
            let embedding = self.create(input).await?;
            results.push(embedding);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}
