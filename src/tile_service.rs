//! Tile computation and caching (component E): the unit of work shared by
//! both the on-demand `/api/tiles/{z}/{x}/{y}` route and the viewport path,
//! backed by the 30-day tile cache and deduplicated in-process via
//! [`crate::singleflight`].
//!
//! Grounded on the original service's `compute_tile_on_fly` (cache lookup,
//! compute on miss, `setex` with a 30-day TTL) and the teacher's handler
//! style of returning a fully-formed response type rather than raw bytes.

use std::sync::Arc;

use crate::cache::Cache;
use crate::cluster::{cluster_points, Cluster, ClusterMode};
use crate::geo::tile_to_bbox;
use crate::points::PointStore;
use crate::singleflight::SingleFlight;
use crate::worker_pool::WorkerPool;

/// Matches the original precomputer's `setex(key, 2592000, ...)`.
pub const TILE_TTL_SECS: u64 = 2_592_000;

pub fn tile_cache_key(z: u32, x: u32, y: u32) -> String {
    format!("tile:{z}:{x}:{y}")
}

#[derive(Clone)]
pub struct TileService {
    points: PointStore,
    cache: Cache,
    cluster_mode: ClusterMode,
    pool: WorkerPool,
    inflight: Arc<SingleFlight<(u32, u32, u32), Vec<Cluster>>>,
}

impl TileService {
    pub fn new(points: PointStore, cache: Cache, cluster_mode: ClusterMode, pool: WorkerPool) -> Self {
        Self {
            points,
            cache,
            cluster_mode,
            pool,
            inflight: Arc::new(SingleFlight::new()),
        }
    }

    /// Returns the clusters for tile `(z, x, y)`, using the cache when
    /// present and computing (with singleflight dedup) on a miss. Never
    /// returns an error: an empty `Vec` covers both "tile genuinely has no
    /// points" and any degraded-cache/compute edge case.
    pub async fn get_tile(&self, z: u32, x: u32, y: u32) -> Vec<Cluster> {
        let key = tile_cache_key(z, x, y);

        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<Vec<Cluster>>(&raw) {
                Ok(clusters) => return clusters,
                Err(error) => {
                    tracing::warn!(%error, key, "corrupt tile cache entry, recomputing");
                }
            }
        }

        let points = self.points.clone();
        let cache = self.cache.clone();
        let mode = self.cluster_mode;
        let pool = self.pool.clone();
        let key_for_write = key.clone();

        self.inflight
            .work((z, x, y), move || async move {
                let clusters = pool
                    .run(move || compute_tile(&points, z, x, y, mode))
                    .await;

                if !clusters.is_empty() {
                    if let Ok(json) = serde_json::to_string(&clusters) {
                        cache.setex(&key_for_write, TILE_TTL_SECS, &json).await;
                    }
                }
                clusters
            })
            .await
    }
}

/// Pure compute step: filters the store to the tile's bbox and clusters
/// the result. Split out from `get_tile` so the precomputer can call it
/// directly without going through the cache or singleflight layers.
pub fn compute_tile(points: &PointStore, z: u32, x: u32, y: u32, mode: ClusterMode) -> Vec<Cluster> {
    let bbox = tile_to_bbox(z, x, y);
    let view = points.filter_bbox(bbox.0, bbox.1, bbox.2, bbox.3);
    cluster_points(&view, z, bbox, mode)
}
