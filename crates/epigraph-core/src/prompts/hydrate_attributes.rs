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

//! Attribute hydration prompts for typed entities

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::llm::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydratedAttributes {
    pub attributes: HashMap<String, serde_json::Value>,
}

pub const SCHEMA: &str = r#"{
  "attributes": {"<field name from the schema>": "extracted value or null"}
}"#;

/// One declared field of an entity type's attribute schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeField {
    pub name: String,
    pub description: String,
}

pub struct Context<'a> {
    pub entity_name: &'a str,
    pub entity_label: &'a str,
    pub evidence_text: &'a str,
    pub fields: &'a [AttributeField],
}

pub fn prompt(ctx: &Context<'_>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that fills in structured attributes for a \
        typed entity from evidence text.";

    let fields = serde_json::to_string_pretty(ctx.fields).unwrap_or_else(|_| "[]".to_string());

    let user_prompt = format!(
        r#"
<ENTITY>
{name} ({label})
</ENTITY>

<EVIDENCE>
{evidence}
</EVIDENCE>

<ATTRIBUTE SCHEMA>
{fields}
</ATTRIBUTE SCHEMA>

Instructions:
1. For each field in ATTRIBUTE SCHEMA, extract its value for the entity from
   EVIDENCE. Return null for fields the evidence does not support.
2. Only include fields declared in the schema.
"#,
        name = ctx.entity_name,
        label = ctx.entity_label,
        evidence = ctx.evidence_text,
        fields = fields,
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}
