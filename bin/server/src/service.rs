use anyhow::Result;
use std::sync::Arc;

use epigraph_core::{
    embedder::openai::{OpenAiEmbedder, OpenAiEmbedderConfig},
    provider::bolt::BoltConfig,
    AddEpisodeOptions, AddEpisodeResults, BoltGraphStore, CachedEmbedderClient,
    EmbeddedGraphStore, EmbedderClient, Engine, EngineConfig, EngineError, EpisodeInput,
    EpisodeSource, EpisodicNode, GraphProvider, LmConfig, OpenAiLmClient, Rerank, SearchConfig,
    SearchMethod, SearchResults,
};

use crate::config::{BackendKind, Settings};
use crate::dto::{AddEpisodesRequest, AppendEpisodeRequest, SearchRequest};

fn parse_methods(raw: &[String]) -> Vec<SearchMethod> {
    raw.iter()
        .filter_map(|m| match m.as_str() {
            "bm25" => Some(SearchMethod::Bm25),
            "cosine" => Some(SearchMethod::Cosine),
            _ => None,
        })
        .collect()
}

/// Service layer: owns the engine and maps transport DTOs onto it.
pub struct EngineService {
    engine: Engine,
}

impl EngineService {
    pub async fn new(settings: Settings) -> Result<Self> {
        let provider: Arc<dyn GraphProvider> = match settings.backend {
            BackendKind::Embedded => Arc::new(EmbeddedGraphStore::new()),
            BackendKind::Bolt => {
                let config = BoltConfig {
                    uri: settings
                        .bolt_uri
                        .clone()
                        .unwrap_or_else(|| "bolt://localhost:7687".to_string()),
                    username: settings.bolt_user.clone(),
                    password: settings.bolt_password.clone(),
                    database: None,
                    ..Default::default()
                };
                Arc::new(
                    BoltGraphStore::connect(config)
                        .await
                        .map_err(|e| anyhow::anyhow!("failed to connect bolt backend: {}", e))?,
                )
            }
        };

        let lm_config = LmConfig {
            api_key: Some(settings.api_key.clone()),
            model: settings.model_name.clone(),
            base_url: settings.api_base_url.clone(),
            ..Default::default()
        };
        let llm = Arc::new(
            OpenAiLmClient::new(lm_config, true)
                .map_err(|e| anyhow::anyhow!("failed to create LM client: {}", e))?,
        );

        let embedder_config = OpenAiEmbedderConfig {
            api_key: Some(settings.api_key.clone()),
            embedding_model: settings
                .embedding_model_name
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            base_url: settings.api_base_url.clone(),
            ..Default::default()
        };
        let embedder = OpenAiEmbedder::new(embedder_config)
            .map_err(|e| anyhow::anyhow!("failed to create embedder: {}", e))?;
        let embedder: Arc<dyn EmbedderClient> =
            Arc::new(CachedEmbedderClient::new(Arc::new(embedder)));

        let engine_config = EngineConfig {
            checkpoint_path: settings.checkpoint_path.clone().map(Into::into),
            ..Default::default()
        };

        let engine = Engine::new(provider, llm, Some(embedder), engine_config)
            .map_err(|e| anyhow::anyhow!("failed to create engine: {}", e))?;
        engine
            .build_indices()
            .await
            .map_err(|e| anyhow::anyhow!("failed to build indices: {}", e))?;

        Ok(Self { engine })
    }

    pub async fn add_episodes(
        &self,
        request: AddEpisodesRequest,
    ) -> Result<Vec<AddEpisodeResults>, EngineError> {
        let mut options = AddEpisodeOptions {
            update_communities: request.update_communities,
            ..Default::default()
        };
        if let Some(max) = request.max_characters_per_chunk {
            options.max_characters_per_chunk = max;
        }
        if let Some(generate) = request.generate_embeddings {
            options.generate_embeddings = generate;
        }

        let mut inputs = Vec::with_capacity(request.episodes.len());
        for body in request.episodes {
            let source = match body.source.as_deref() {
                Some(raw) => EpisodeSource::from_str(raw)?,
                None => EpisodeSource::Text,
            };
            let mut input = EpisodeInput::new(
                body.name.unwrap_or_else(|| "Episode".to_string()),
                body.content,
                request.group_id.clone(),
            )
            .with_source(source);
            input.source_description = body.source_description;
            if let Some(uuid) = body.uuid {
                input = input.with_uuid(uuid);
            }
            if let Some(reference_time) = body.reference_time {
                input = input.with_reference_time(reference_time);
            }
            inputs.push(input);
        }

        self.engine.add(inputs, &options).await
    }

    pub async fn append_episode(
        &self,
        episode_uuid: &str,
        request: AppendEpisodeRequest,
    ) -> Result<AddEpisodeResults, EngineError> {
        self.engine
            .add_to_episode(
                episode_uuid,
                &request.group_id,
                &request.additional_content,
                &AddEpisodeOptions::default(),
            )
            .await
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResults, EngineError> {
        let mut config = SearchConfig::default();
        if let Some(limit) = request.limit {
            config.limit = limit;
        }
        if let Some(min_score) = request.min_score {
            config.min_score = min_score;
        }
        if let Some(include_edges) = request.include_edges {
            config.include_edges = include_edges;
        }
        config.center_node_uuid = request.center_node_uuid.clone();
        if let Some(weight) = request.center_node_distance_weight {
            config.center_node_distance_weight = weight;
        }
        config.rerank = match request.rerank.as_deref() {
            Some("none") => Rerank::None,
            _ => Rerank::Rrf,
        };
        if let Some(methods) = &request.node_search_methods {
            config.node_search_methods = parse_methods(methods);
        }
        if let Some(methods) = &request.edge_search_methods {
            config.edge_search_methods = parse_methods(methods);
        }

        self.engine
            .search(&request.query, &request.group_id, &config)
            .await
    }

    pub async fn recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicNode>, EngineError> {
        self.engine.recent_episodes(group_id, limit).await
    }

    pub async fn clear_group(&self, group_id: &str) -> Result<(), EngineError> {
        self.engine.clear_group(group_id).await
    }
}
