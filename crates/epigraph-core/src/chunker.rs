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

//! Episode chunking.
//!
//! Splits oversized episode bodies into ordered chunks within a character
//! budget. The boundary search is `text_splitter`'s semantic hierarchy:
//! paragraph breaks first, then sentence boundaries, then words, with a
//! grapheme-level hard split only when a single token exceeds the budget.
//! Chunks are not trimmed, so their bodies concatenate back to the
//! original content exactly.

use serde::{Deserialize, Serialize};
use text_splitter::TextSplitter;

/// Characters of trailing context carried into the next chunk's LM calls.
pub const PRIOR_TAIL_CHARS: usize = 200;

pub const DEFAULT_MAX_CHARACTERS: usize = 4000;

/// One ordered slice of an episode body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub total: usize,
    pub body: String,
    /// Last ~200 chars of the previous chunk; empty for the first.
    pub prior_tail: String,
}

/// Split `content` into chunks of at most `max_characters` characters.
pub fn split(content: &str, max_characters: usize) -> Vec<Chunk> {
    let splitter: TextSplitter<text_splitter::Characters> =
        TextSplitter::default().with_trim_chunks(false);
    let bodies: Vec<String> = splitter
        .chunks(content, max_characters.max(1))
        .map(|body| body.to_string())
        .collect();

    let total = bodies.len();
    let mut chunks = Vec::with_capacity(total);
    let mut prior_tail = String::new();
    for (index, body) in bodies.into_iter().enumerate() {
        let next_tail = tail_of(&body);
        chunks.push(Chunk {
            index,
            total,
            body,
            prior_tail: std::mem::take(&mut prior_tail),
        });
        prior_tail = next_tail;
    }
    chunks
}

fn tail_of(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let from = chars.len().saturating_sub(PRIOR_TAIL_CHARS);
    chars[from..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.body.as_str()).collect()
    }

    #[test]
    fn test_short_content_is_one_chunk() {
        let chunks = split("Alice works at Acme.", 4000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
        assert!(chunks[0].prior_tail.is_empty());
        assert_eq!(chunks[0].body, "Alice works at Acme.");
    }

    #[test]
    fn test_chunks_concatenate_to_original() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let content = sentence.repeat(300); // 13500 chars
        let chunks = split(&content, 4000);

        assert_eq!(reassemble(&chunks), content);
        assert!(chunks.iter().all(|c| c.body.chars().count() <= 4000));
        // ceil(len / max) ± 1
        let expected = content.chars().count().div_ceil(4000);
        assert!(chunks.len() >= expected && chunks.len() <= expected + 1);
    }

    #[test]
    fn test_chunk_count_for_nine_thousand_chars() {
        let sentence = "Robins sing at dawn near the old mill pond every spring morning. ";
        let mut content = sentence.repeat(138);
        content.truncate(9000);
        let chunks = split(&content, 4000);

        // ceil(8970 / 4000) = 3, ± 1
        assert!((2..=4).contains(&chunks.len()), "got {} chunks", chunks.len());
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
        assert!(chunks.iter().all(|c| c.total == chunks.len()));
        assert!(chunks.iter().all(|c| c.body.chars().count() <= 4000));
        assert_eq!(reassemble(&chunks), content);
    }

    #[test]
    fn test_splits_at_paragraph_boundary() {
        let first = "a".repeat(3000);
        let second = "b".repeat(2000);
        let content = format!("{}\n\n{}", first, second);
        let chunks = split(&content, 4000);

        // Two paragraphs that cannot share a chunk stay whole.
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].body.contains(&first));
        assert!(!chunks[0].body.contains("b"));
        assert!(chunks[1].body.contains(&second));
        assert!(!chunks[1].body.contains("a"));
        assert_eq!(reassemble(&chunks), content);
    }

    #[test]
    fn test_never_splits_mid_word() {
        let content = "alpha beta gamma delta epsilon ".repeat(500);
        let words: std::collections::HashSet<&str> =
            ["alpha", "beta", "gamma", "delta", "epsilon"].into();
        for chunk in split(&content, 100) {
            for token in chunk.body.split_whitespace() {
                assert!(words.contains(token), "word split across chunks: {:?}", token);
            }
        }
    }

    #[test]
    fn test_hard_split_of_unbroken_token() {
        let content = "x".repeat(10);
        let chunks = split(&content, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(reassemble(&chunks), content);
    }

    #[test]
    fn test_prior_tail_threads_between_chunks() {
        let content = "one two three. ".repeat(600);
        let chunks = split(&content, 1000);
        assert!(chunks.len() > 1);
        assert!(chunks[0].prior_tail.is_empty());
        for pair in chunks.windows(2) {
            let tail = &pair[1].prior_tail;
            assert!(tail.chars().count() <= PRIOR_TAIL_CHARS);
            assert!(pair[0].body.ends_with(tail.as_str()));
        }
    }

    #[test]
    fn test_empty_content_yields_no_chunks() {
        assert!(split("", 4000).is_empty());
    }
}
