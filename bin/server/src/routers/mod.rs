pub mod ingest;
pub mod retrieve;

use axum::Router;

/// Compose the API routers
pub fn create_router() -> Router {
    Router::new()
        .nest("/ingest", ingest::create_router())
        .nest("/retrieve", retrieve::create_router())
}
