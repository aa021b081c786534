use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// One episode in an ingestion request
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct EpisodeBody {
    pub uuid: Option<String>,
    pub name: Option<String>,
    #[validate(length(min = 1))]
    pub content: String,
    /// text | json | message
    pub source: Option<String>,
    #[serde(default)]
    pub source_description: String,
    pub reference_time: Option<DateTime<Utc>>,
}

/// Request to add episodes to the graph
#[derive(Debug, Deserialize, Validate)]
pub struct AddEpisodesRequest {
    #[validate(length(min = 1))]
    pub group_id: String,
    #[validate(length(min = 1), nested)]
    pub episodes: Vec<EpisodeBody>,
    #[serde(default)]
    pub update_communities: bool,
    pub max_characters_per_chunk: Option<usize>,
    pub generate_embeddings: Option<bool>,
}

/// Request to append content to an existing episode
#[derive(Debug, Deserialize, Validate)]
pub struct AppendEpisodeRequest {
    #[validate(length(min = 1))]
    pub group_id: String,
    #[validate(length(min = 1))]
    pub additional_content: String,
}
