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

//! Entity deduplication prompts

use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// Match decision for one candidate entity against the existing graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeDecision {
    /// Uuid of the existing entity this candidate refers to, or null.
    #[serde(default)]
    pub matches_existing: Option<String>,
    /// "merge" to fold the candidate into the match, "keep" to create new.
    pub merge_or_keep: String,
}

pub const SCHEMA: &str = r#"{
  "matches_existing": "uuid of the matching existing entity, or null",
  "merge_or_keep": "merge | keep"
}"#;

/// An existing-entity candidate shown to the LM.
#[derive(Debug, Clone, Serialize)]
pub struct Neighbor<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub summary: &'a str,
}

pub struct Context<'a> {
    pub candidate_name: &'a str,
    pub candidate_context: &'a str,
    pub neighbors: &'a [Neighbor<'a>],
}

pub fn prompt(ctx: &Context<'_>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that decides whether a newly extracted \
        entity refers to an entity that already exists in a knowledge graph.";

    let neighbors = serde_json::to_string_pretty(ctx.neighbors).unwrap_or_else(|_| "[]".to_string());

    let user_prompt = format!(
        r#"
<NEW ENTITY>
{name}
</NEW ENTITY>

<ENTITY CONTEXT>
{context}
</ENTITY CONTEXT>

<EXISTING ENTITIES>
{neighbors}
</EXISTING ENTITIES>

Instructions:
1. If the new entity refers to the same real-world thing as one of the EXISTING
   ENTITIES, return that entity's uuid in `matches_existing` and "merge" in
   `merge_or_keep`.
2. A different spelling, abbreviation, or partial name of the same thing is a match.
   A different thing with a similar name is not.
3. If there is no match, return null and "keep".
"#,
        name = ctx.candidate_name,
        context = ctx.candidate_context,
        neighbors = neighbors,
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}
