pub mod common;
pub mod ingest;
pub mod retrieve;

pub use common::ApiResult;
pub use ingest::{AddEpisodesRequest, AppendEpisodeRequest, EpisodeBody};
pub use retrieve::{SearchRequest, SearchResponse};
