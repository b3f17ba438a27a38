//! Viewport query (component F): the top-level `/api/markers` path. Checks
//! the 5-minute viewport-result cache first, then falls back to the
//! tile-granular cache/compute path in [`crate::tile_service`], merging
//! whatever tiles cover the requested bounds.
//!
//! Grounded on the original service's `get_markers` endpoint: `get_cache_key`
//! (MD5 of the rounded bbox and zoom), a viewport-cache hit short-circuiting
//! everything else, and a cache-miss path that resolves covering tiles and
//! fetches them concurrently.

use futures::future::join_all;

use crate::cache::Cache;
use crate::cluster::Cluster;
use crate::geo::{bounds_to_tiles, Z_MAX, Z_MIN};
use crate::tile_service::{tile_cache_key, TileService};

pub const VIEWPORT_TTL_SECS: u64 = 300;

/// Bounding box coordinates are rounded before hashing, so viewports that
/// pan by a few meters share a cache entry rather than each minting a new
/// one: 3 decimals below zoom 10, 4 from zoom 10 up, matching the tighter
/// precision the original needs once tiles get small.
fn precision_for_zoom(zoom: u32) -> usize {
    if zoom < 10 {
        3
    } else {
        4
    }
}

fn round_coord(v: f64, precision: usize) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (v * factor).round() / factor
}

/// `viewport:{md5 of rounded bbox + zoom}`, mirroring the original
/// service's `get_cache_key`.
pub fn viewport_cache_key(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64, zoom: u32) -> String {
    let precision = precision_for_zoom(zoom);
    let raw = format!(
        "{:.precision$}:{:.precision$}:{:.precision$}:{:.precision$}:{}",
        round_coord(min_lat, precision),
        round_coord(max_lat, precision),
        round_coord(min_lon, precision),
        round_coord(max_lon, precision),
        zoom,
    );
    let digest = md5::compute(raw.as_bytes());
    format!("viewport:{digest:x}")
}

#[derive(Clone)]
pub struct ViewportService {
    cache: Cache,
    tiles: TileService,
}

impl ViewportService {
    pub fn new(cache: Cache, tiles: TileService) -> Self {
        Self { cache, tiles }
    }

    /// Returns the clusters covering `[min_lat, max_lat] x [min_lon,
    /// max_lon]` at `zoom`, which is clamped into `[Z_MIN, Z_MAX]` before
    /// any lookup. Tile results are concatenated as-is: a cluster can
    /// belong to a tile slightly beyond the viewport's edge, matching the
    /// original per-tile cache granularity.
    pub async fn get_markers(
        &self,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
        zoom: u32,
    ) -> Vec<Cluster> {
        let zoom = zoom.clamp(Z_MIN, Z_MAX);
        let key = viewport_cache_key(min_lat, max_lat, min_lon, max_lon, zoom);

        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<Vec<Cluster>>(&raw) {
                Ok(clusters) => return clusters,
                Err(error) => {
                    tracing::warn!(%error, key, "corrupt viewport cache entry, recomputing");
                }
            }
        }

        let tiles = bounds_to_tiles(min_lat, max_lat, min_lon, max_lon, zoom);
        let tile_keys: Vec<String> = tiles.iter().map(|(x, y)| tile_cache_key(zoom, *x, *y)).collect();
        let cached = self.cache.mget(&tile_keys).await;

        let mut merged = Vec::new();
        let mut misses = Vec::new();
        for (coords, entry) in tiles.iter().zip(cached.into_iter()) {
            match entry.and_then(|raw| serde_json::from_str::<Vec<Cluster>>(&raw).ok()) {
                Some(clusters) => merged.extend(clusters),
                None => misses.push(*coords),
            }
        }

        if !misses.is_empty() {
            let fetched = join_all(misses.into_iter().map(|(x, y)| {
                let tiles = self.tiles.clone();
                async move { tiles.get_tile(zoom, x, y).await }
            }))
            .await;
            merged.extend(fetched.into_iter().flatten());
        }

        if !merged.is_empty() {
            if let Ok(json) = serde_json::to_string(&merged) {
                self.cache.setex(&key, VIEWPORT_TTL_SECS, &json).await;
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterMode;
    use crate::points::{Point, PointStore};
    use crate::worker_pool::WorkerPool;

    fn point(id: &str, lat: f64, lon: f64) -> Point {
        Point {
            id: id.into(),
            latitude: lat,
            longitude: lon,
            days_on_market: None,
            margin: None,
            type_local: None,
            address: None,
        }
    }

    fn service() -> ViewportService {
        let store = PointStore::new(vec![
            point("p1", 48.8566, 2.3522),
            point("p2", 43.2965, 5.3698),
        ]);
        let tiles = TileService::new(store, Cache::disabled(), ClusterMode::Grid, WorkerPool::new(2));
        ViewportService::new(Cache::disabled(), tiles)
    }

    #[test]
    fn cache_key_is_stable_across_equivalent_bboxes() {
        let a = viewport_cache_key(41.00001, 51.0, -5.0, 10.0, 6);
        let b = viewport_cache_key(41.00002, 51.0, -5.0, 10.0, 6);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_on_zoom() {
        let a = viewport_cache_key(41.0, 51.0, -5.0, 10.0, 6);
        let b = viewport_cache_key(41.0, 51.0, -5.0, 10.0, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn zoom_at_or_above_ten_rounds_to_a_finer_precision() {
        // Differ only in the 4th decimal: collapses below zoom 10, distinct at/above it.
        let below_a = viewport_cache_key(41.00001, 51.0, -5.0, 10.0, 9);
        let below_b = viewport_cache_key(41.00009, 51.0, -5.0, 10.0, 9);
        assert_eq!(below_a, below_b);

        let above_a = viewport_cache_key(41.00001, 51.0, -5.0, 10.0, 10);
        let above_b = viewport_cache_key(41.00009, 51.0, -5.0, 10.0, 10);
        assert_ne!(above_a, above_b);
    }

    #[tokio::test]
    async fn markers_cover_both_points_across_tiles() {
        let svc = service();
        let clusters = svc.get_markers(41.0, 51.0, -5.0, 10.0, 6).await;
        let total: u32 = clusters.iter().map(|c| c.count).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn zoom_out_of_range_is_clamped_not_rejected() {
        let svc = service();
        let clusters = svc.get_markers(41.0, 51.0, -5.0, 10.0, 30).await;
        let total: u32 = clusters.iter().map(|c| c.count).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn empty_viewport_returns_no_clusters() {
        let svc = service();
        let clusters = svc.get_markers(1.0, 2.0, 1.0, 2.0, 6).await;
        assert!(clusters.is_empty());
    }
}
