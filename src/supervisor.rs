//! Startup orchestration (component H): loads the dataset, wires the
//! cache/tile/viewport services together, and launches the background
//! pre-warm and precompute jobs.
//!
//! Grounded on the original service's `lifespan` handler: load the dataset
//! into memory once, kick off a synchronous pre-warm pass, then hand the
//! full sweep to a background task — reshaped here into a `tokio::spawn`
//! pair instead of the original's raw threads.

use crate::cache::Cache;
use crate::cluster::ClusterMode;
use crate::config::Config;
use crate::loader::load_points;
use crate::points::{Point, PointStore};
use crate::precompute::{Precomputer, StatusHandle};
use crate::tile_service::TileService;
use crate::viewport::ViewportService;
use crate::worker_pool::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub viewport: ViewportService,
    pub tiles: TileService,
    pub status: StatusHandle,
    pub point_count: usize,
}

/// Builds the service's shared state and the precomputer that will run
/// against it. Returned separately so the caller can decide whether (and
/// when) to launch the precomputer's background jobs.
pub async fn build_state(config: &Config) -> anyhow::Result<(AppState, Precomputer)> {
    let raw_points = load_points(config).await?;
    let store = PointStore::new(raw_points);
    let point_count = store.len();

    let cache = Cache::connect(&config.redis_url).await;
    let pool = WorkerPool::new(config.compute_workers);

    let tiles = TileService::new(store.clone(), cache.clone(), config.cluster_mode, pool.clone());
    let viewport = ViewportService::new(cache.clone(), tiles.clone());
    let precomputer = Precomputer::new(
        store,
        cache,
        config.cluster_mode,
        config.precompute_region,
        pool,
    );
    let status = precomputer.status_handle();

    Ok((
        AppState {
            viewport,
            tiles,
            status,
            point_count,
        },
        precomputer,
    ))
}

/// Builds state directly from an in-memory point set and a disabled
/// cache, bypassing the network-backed dataset load and Redis connection.
/// Used by tests and benchmarks.
pub fn test_state(points: Vec<Point>, cluster_mode: ClusterMode) -> AppState {
    let store = PointStore::new(points);
    let point_count = store.len();
    let cache = Cache::disabled();
    let pool = WorkerPool::new(2);

    let tiles = TileService::new(store, cache.clone(), cluster_mode, pool);
    let viewport = ViewportService::new(cache, tiles.clone());

    AppState {
        viewport,
        tiles,
        status: StatusHandle::default(),
        point_count,
    }
}

/// Launches the pre-warm pass followed by the full precompute sweep as a
/// single background task, unless `SKIP_PRECOMPUTE` is set. The pre-warm
/// pass runs first and synchronously within that task so the full sweep
/// never starts ahead of it.
pub fn spawn_background_jobs(config: &Config, precomputer: Precomputer) {
    if config.skip_precompute {
        tracing::info!("SKIP_PRECOMPUTE set, background precompute jobs will not run");
        return;
    }

    tokio::spawn(async move {
        precomputer.prewarm().await;
        precomputer.run().await;
    });
}
