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

//! Prompt library.
//!
//! One module per structured LM call. Each exposes a typed response model,
//! a `SCHEMA` string handed to [`crate::llm::LmClient::generate_response`],
//! and a function from a typed context to the message list.

pub mod dedupe_entities;
pub mod extract_edges;
pub mod extract_entities;
pub mod hydrate_attributes;
pub mod judge_temporal;

/// Appended to user prompts on a strict re-ask after a schema mismatch.
pub const STRICT_REPROMPT: &str = "\n\nYour previous reply did not match the required JSON \
    schema. Respond with ONLY a JSON object that matches the schema exactly; no prose, no \
    markdown fences.";
