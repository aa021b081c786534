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

//! Edge (fact) extraction prompts

use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// One fact surfaced from a chunk, endpoints referenced by local name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEdge {
    pub source_name: String,
    pub target_name: String,
    /// Relation type in snake_case, e.g. `works_at`.
    pub name: String,
    pub fact: String,
    #[serde(default)]
    pub valid_at_hint: Option<String>,
    #[serde(default)]
    pub invalid_at_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEdgesResponse {
    pub edges: Vec<ExtractedEdge>,
}

pub const SCHEMA: &str = r#"{
  "edges": [
    {
      "source_name": "string",
      "target_name": "string",
      "name": "string (snake_case relation)",
      "fact": "string (one-sentence statement of the fact)",
      "valid_at_hint": "RFC 3339 datetime or null",
      "invalid_at_hint": "RFC 3339 datetime or null"
    }
  ]
}"#;

pub struct Context<'a> {
    pub chunk_text: &'a str,
    pub prior_chunk_tail: &'a str,
    pub entity_names: &'a [String],
    pub prior_facts: &'a [String],
    pub allowed_edge_names: &'a [String],
    pub reference_time: &'a str,
}

pub fn prompt(ctx: &Context<'_>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that extracts factual relationships between \
        known entities from text. Each fact is a directed edge between two of the given \
        entities.";

    let allowed = if ctx.allowed_edge_names.is_empty() {
        "any".to_string()
    } else {
        ctx.allowed_edge_names.join(", ")
    };

    let user_prompt = format!(
        r#"
<PRECEDING TEXT>
{prior}
</PRECEDING TEXT>

<CURRENT TEXT>
{chunk}
</CURRENT TEXT>

<ENTITIES>
{entities}
</ENTITIES>

<PREVIOUSLY EXTRACTED FACTS>
{prior_facts}
</PREVIOUSLY EXTRACTED FACTS>

<ALLOWED RELATION NAMES>
{allowed}
</ALLOWED RELATION NAMES>

<REFERENCE TIME>
{reference_time}
</REFERENCE TIME>

Instructions:
1. Extract each factual relationship stated in CURRENT TEXT whose endpoints both
   appear in ENTITIES. Use the entity names exactly as listed.
2. `fact` restates the relationship as one natural-language sentence.
3. When the text states when the fact became true or stopped being true, return it
   as an RFC 3339 datetime hint, resolving relative expressions against REFERENCE
   TIME. Otherwise return null.
4. When ALLOWED RELATION NAMES is not "any", only use names from that list.
5. Do not repeat facts already present in PREVIOUSLY EXTRACTED FACTS.
"#,
        prior = ctx.prior_chunk_tail,
        chunk = ctx.chunk_text,
        entities = ctx.entity_names.join("\n"),
        prior_facts = ctx.prior_facts.join("\n"),
        allowed = allowed,
        reference_time = ctx.reference_time,
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}
