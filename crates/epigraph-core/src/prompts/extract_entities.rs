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

//! Entity extraction prompts

use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// One entity surfaced from a chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Rough location of the mention inside the chunk, for debugging.
    #[serde(default)]
    pub span_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntitiesResponse {
    pub extracted_entities: Vec<ExtractedEntity>,
}

pub const SCHEMA: &str = r#"{
  "extracted_entities": [
    {"name": "string", "label": "string or null", "span_hint": "string or null"}
  ]
}"#;

pub struct Context<'a> {
    pub chunk_text: &'a str,
    pub prior_chunk_tail: &'a str,
    pub recent_episodes: &'a [String],
    pub allowed_labels: &'a [String],
    pub excluded_labels: &'a [String],
}

pub fn prompt(ctx: &Context<'_>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that extracts entity nodes from text. \
        Your primary task is to extract and classify the significant entities mentioned \
        in the provided content.";

    let allowed = if ctx.allowed_labels.is_empty() {
        "any".to_string()
    } else {
        ctx.allowed_labels.join(", ")
    };
    let excluded = ctx.excluded_labels.join(", ");
    let recent = ctx.recent_episodes.join("\n---\n");

    let user_prompt = format!(
        r#"
<RECENT EPISODES>
{recent}
</RECENT EPISODES>

<PRECEDING TEXT>
{prior}
</PRECEDING TEXT>

<CURRENT TEXT>
{chunk}
</CURRENT TEXT>

<ALLOWED ENTITY LABELS>
{allowed}
</ALLOWED ENTITY LABELS>

<EXCLUDED ENTITY LABELS>
{excluded}
</EXCLUDED ENTITY LABELS>

Instructions:
1. Extract each significant entity (person, organization, place, product, concept)
   mentioned in CURRENT TEXT. Use PRECEDING TEXT and RECENT EPISODES only to resolve
   references; do not extract entities that appear exclusively there.
2. Use the entity's full name as it appears in the text.
3. When ALLOWED ENTITY LABELS is not "any", only return entities whose label is in
   that list. Never return entities labeled with an EXCLUDED ENTITY LABEL.
4. Do not extract relationships, actions, dates, or other temporal information as
   entities.
"#,
        recent = recent,
        prior = ctx.prior_chunk_tail,
        chunk = ctx.chunk_text,
        allowed = allowed,
        excluded = excluded,
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}
