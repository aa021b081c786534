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

//! Shared helpers: ids, time, vector math, query sanitizing, bounded fan-out.

use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Default bound on concurrent LM calls, process-wide.
pub const DEFAULT_SEMAPHORE_LIMIT: usize = 10;

/// Time-sortable uuid for all graph identities.
pub fn new_uuid() -> String {
    Uuid::now_v7().to_string()
}

/// Current time truncated to microseconds, so round-trips through backends
/// that store microsecond precision compare equal.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Normalize an embedding vector using its L2 norm.
pub fn normalize_l2(embedding: &[f32]) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm == 0.0 {
        embedding.to_vec()
    } else {
        embedding.iter().map(|x| x / norm).collect()
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a * norm_b)) as f64
    }
}

/// Sanitize a query string for Lucene full-text search (Bolt backends).
pub fn lucene_sanitize(query: &str) -> String {
    query
        .chars()
        .filter_map(|c| match c {
            '+' | '-' | '&' | '|' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~'
            | '*' | '?' | ':' | '\\' | '/' => Some(format!("\\{}", c)),
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c.to_string()),
            _ => None,
        })
        .collect::<Vec<String>>()
        .join("")
}

/// Split text into lowercase alphanumeric terms. Shared by the embedded
/// provider's BM25 index and the deterministic test embedder.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Execute futures with semaphore-bounded concurrency, preserving input
/// order in the output.
pub async fn semaphore_gather<T, F>(futures: Vec<F>, max_concurrent: Option<usize>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send,
    T: Send,
{
    let limit = max_concurrent.unwrap_or(DEFAULT_SEMAPHORE_LIMIT);
    let semaphore = Semaphore::new(limit);

    let tasks: Vec<_> = futures
        .into_iter()
        .map(|future| {
            let semaphore = &semaphore;
            async move {
                // acquire never fails while the semaphore is open
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                future.await
            }
        })
        .collect();

    join_all(tasks).await
}
