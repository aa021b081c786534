use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::error;
use validator::Validate;

use crate::{
    dto::{SearchRequest, SearchResponse},
    service::EngineService,
};

/// Create retrieve router
pub fn create_router() -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/episodes/:group_id", get(recent_episodes))
}

/// Hybrid search over one group
async fn search(
    Extension(service): Extension<Arc<EngineService>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    match service.search(request).await {
        Ok(results) => Ok(Json(results.into())),
        Err(e) => {
            error!("search failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentEpisodesParams {
    limit: Option<usize>,
}

/// Most recent episodes in a group, newest first
async fn recent_episodes(
    Extension(service): Extension<Arc<EngineService>>,
    Path(group_id): Path<String>,
    Query(params): Query<RecentEpisodesParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match service
        .recent_episodes(&group_id, params.limit.unwrap_or(10))
        .await
    {
        Ok(episodes) => Ok(Json(serde_json::json!({ "episodes": episodes }))),
        Err(e) => {
            error!("recent episodes failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
