pub mod api_constants;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod loader;
pub mod points;
pub mod precompute;
pub mod singleflight;
pub mod supervisor;
pub mod tile_service;
pub mod viewport;
pub mod worker_pool;

use axum::routing::get;
use axum::Router;

use crate::supervisor::AppState;

/// Builds the full route table over `state`. Shared by `main` (wrapped in
/// production middleware) and by tests/benches that need a bare router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(api_constants::HEALTH_ROUTE, get(handlers::health_check))
        .route(api_constants::INDEX_ROUTE, get(handlers::index))
        .route(api_constants::MARKERS_ROUTE, get(handlers::get_markers))
        .route(api_constants::TILE_ROUTE, get(handlers::get_tile))
        .route(api_constants::STATUS_ROUTE, get(handlers::get_status))
        .with_state(state)
}
