use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
    routing::{delete, post},
    Router,
};
use tracing::error;
use validator::Validate;

use epigraph_core::EngineError;

use crate::{
    dto::{AddEpisodesRequest, ApiResult, AppendEpisodeRequest},
    service::EngineService,
};

/// Create ingest router
pub fn create_router() -> Router {
    Router::new()
        .route("/episodes", post(add_episodes))
        .route("/episodes/:uuid/append", post(append_episode))
        .route("/group/:group_id", delete(delete_group))
}

fn status_of(error: &EngineError) -> StatusCode {
    match error {
        EngineError::InputInvalid(_) => StatusCode::BAD_REQUEST,
        EngineError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::BackendConflict { .. } => StatusCode::CONFLICT,
        EngineError::RetriesExhausted { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Ingest a batch of episodes
async fn add_episodes(
    Extension(service): Extension<Arc<EngineService>>,
    Json(request): Json<AddEpisodesRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    match service.add_episodes(request).await {
        Ok(results) => {
            let summary: Vec<serde_json::Value> = results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "episode_uuid": r.episode.uuid(),
                        "nodes": r.nodes.len(),
                        "edges": r.edges.len(),
                        "invalidated_edges": r.invalidated_edges.len(),
                        "skipped_chunks": r.skipped_chunks,
                    })
                })
                .collect();
            Ok((
                StatusCode::CREATED,
                Json(serde_json::json!({"episodes": summary})),
            ))
        }
        Err(e) => {
            error!("add episodes failed: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Append content to an existing episode
async fn append_episode(
    Extension(service): Extension<Arc<EngineService>>,
    Path(uuid): Path<String>,
    Json(request): Json<AppendEpisodeRequest>,
) -> Result<(StatusCode, Json<ApiResult>), StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    match service.append_episode(&uuid, request).await {
        Ok(results) => Ok((
            StatusCode::OK,
            Json(ApiResult::ok(format!(
                "appended to {}: {} new edges",
                uuid,
                results.edges.len()
            ))),
        )),
        Err(e) => {
            error!("append episode failed: {}", e);
            Err(status_of(&e))
        }
    }
}

/// Delete all graph data for a group
async fn delete_group(
    Extension(service): Extension<Arc<EngineService>>,
    Path(group_id): Path<String>,
) -> Result<(StatusCode, Json<ApiResult>), StatusCode> {
    match service.clear_group(&group_id).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(ApiResult::ok(format!("group {} cleared", group_id))),
        )),
        Err(e) => {
            error!("clear group failed: {}", e);
            Err(status_of(&e))
        }
    }
}
