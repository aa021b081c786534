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

//! Temporal contradiction judgment prompts

use serde::{Deserialize, Serialize};

use crate::llm::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalJudgment {
    pub contradicts: bool,
    /// When the existing fact stopped being true, if the new fact implies it.
    #[serde(default)]
    pub invalidated_at: Option<String>,
}

pub const SCHEMA: &str = r#"{
  "contradicts": "boolean",
  "invalidated_at": "RFC 3339 datetime or null"
}"#;

pub struct Context<'a> {
    pub new_fact: &'a str,
    pub new_fact_valid_at: &'a str,
    pub existing_fact: &'a str,
    pub existing_fact_valid_at: &'a str,
}

pub fn prompt(ctx: &Context<'_>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that judges whether a newly learned fact \
        contradicts an existing fact about the same entities, making the existing fact \
        no longer true.";

    let user_prompt = format!(
        r#"
<NEW FACT>
{new_fact}
(became true at: {new_valid_at})
</NEW FACT>

<EXISTING FACT>
{existing_fact}
(became true at: {existing_valid_at})
</EXISTING FACT>

Instructions:
1. `contradicts` is true only if both facts cannot be true at the same time, meaning
   the new fact supersedes or ends the existing one.
2. Facts that can coexist (different aspects, additive information) do not contradict.
3. If the new fact implies when the existing fact stopped being true, return that
   moment in `invalidated_at`; the new fact's start time is the usual answer.
"#,
        new_fact = ctx.new_fact,
        new_valid_at = ctx.new_fact_valid_at,
        existing_fact = ctx.existing_fact,
        existing_valid_at = ctx.existing_fact_valid_at,
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}
