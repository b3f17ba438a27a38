//! Background tile precomputer and pre-warm pass (component G). Iterates
//! every zoom in `[Z_MIN, Z_MAX]` over the deployment's configured region,
//! clustering and writing each tile to the cache ahead of any request for
//! it, so steady-state traffic mostly hits warm tiles.
//!
//! A Redis lease (`SET NX EX`, see [`crate::cache::Cache::acquire_lease`])
//! keeps at most one process across a fleet running the full sweep at a
//! time; a process that doesn't win the lease simply skips its turn rather
//! than duplicating the work.
//!
//! Grounded on `precompute_tiles.py`'s `precompute_all_tiles` (zoom loop,
//! per-zoom tile_x/tile_y enumeration restricted to a bounding region,
//! `pipe.setex(..., 2592000, ...)` flushed every 1000 entries) and
//! `main.py`'s `prewarm_initial_tiles` (a synchronous low-zoom pass over
//! the same region run once at startup, ahead of the full background
//! sweep).

use std::sync::{Arc, Mutex};

use crate::cache::Cache;
use crate::cluster::ClusterMode;
use crate::config::Region;
use crate::geo::{tile_range, Z_MAX, Z_MIN};
use crate::points::PointStore;
use crate::tile_service::{compute_tile, tile_cache_key, TILE_TTL_SECS};
use crate::worker_pool::WorkerPool;

pub const PRECOMPUTE_LEASE_NAME: &str = "h3:precompute:lock";
pub const PRECOMPUTE_LEASE_TTL_SECS: u64 = 3600;
const PRECOMPUTE_DONE_KEY: &str = "h3:precompute:done";
const FLUSH_EVERY: usize = 1000;

/// Zoom range swept synchronously at startup before the full background
/// sweep takes over, matching the original's low-zoom prewarm pass.
const PREWARM_ZOOM_RANGE: std::ops::RangeInclusive<u32> = 6..=8;

#[derive(Debug, Clone, Default)]
pub struct PrecomputeStatus {
    pub running: bool,
    pub completed: bool,
    pub error: Option<String>,
}

/// A cheaply clonable handle onto the precomputer's current status,
/// exposed to the `/api/status` handler. Replaces the original's ad-hoc
/// global dict with a small struct behind a mutex, snapshotted by value on
/// read so a reader never observes a half-written status.
#[derive(Clone, Default)]
pub struct StatusHandle(Arc<Mutex<PrecomputeStatus>>);

impl StatusHandle {
    pub fn snapshot(&self) -> PrecomputeStatus {
        self.0.lock().expect("status mutex poisoned").clone()
    }

    fn set(&self, status: PrecomputeStatus) {
        *self.0.lock().expect("status mutex poisoned") = status;
    }
}

#[derive(Clone)]
pub struct Precomputer {
    points: PointStore,
    cache: Cache,
    cluster_mode: ClusterMode,
    region: Region,
    pool: WorkerPool,
    status: StatusHandle,
}

impl Precomputer {
    pub fn new(points: PointStore, cache: Cache, cluster_mode: ClusterMode, region: Region, pool: WorkerPool) -> Self {
        Self {
            points,
            cache,
            cluster_mode,
            region,
            pool,
            status: StatusHandle::default(),
        }
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Synchronously computes and caches the low-zoom tiles over the
    /// configured region. Intended to run once at startup so the very
    /// first requests into a cold cache already have something warm to
    /// serve.
    pub async fn prewarm(&self) {
        tracing::info!(
            region = ?self.region,
            "prewarming low-zoom tiles"
        );
        for z in PREWARM_ZOOM_RANGE {
            if let Err(error) = self.sweep_zoom(z).await {
                tracing::warn!(%error, z, "prewarm pass failed for zoom level");
            }
        }
    }

    /// Attempts to acquire the precompute lease and, if successful, runs
    /// the full `[Z_MIN, Z_MAX]` sweep. A process that loses the race (or
    /// finds Redis unreachable) logs and returns immediately — this is
    /// normal steady-state behavior in a multi-instance deployment.
    pub async fn run(&self) {
        let Some(lease) = self
            .cache
            .acquire_lease(PRECOMPUTE_LEASE_NAME, PRECOMPUTE_LEASE_TTL_SECS)
            .await
        else {
            tracing::debug!("precompute lease unavailable, skipping this run");
            return;
        };

        self.status.set(PrecomputeStatus {
            running: true,
            completed: false,
            error: None,
        });

        let mut outcome = Ok(());
        for z in Z_MIN..=Z_MAX {
            if let Err(error) = self.sweep_zoom(z).await {
                tracing::error!(%error, z, "precompute sweep failed");
                outcome = Err(error.to_string());
                break;
            }
        }

        self.status.set(match &outcome {
            Ok(()) => PrecomputeStatus {
                running: false,
                completed: true,
                error: None,
            },
            Err(message) => PrecomputeStatus {
                running: false,
                completed: false,
                error: Some(message.clone()),
            },
        });

        if outcome.is_ok() {
            self.cache.set_forever(PRECOMPUTE_DONE_KEY, "1").await;
        }

        lease.release().await;
    }

    async fn sweep_zoom(&self, z: u32) -> anyhow::Result<()> {
        let (x_lo, x_hi, y_lo, y_hi) = tile_range(
            self.region.min_lat,
            self.region.max_lat,
            self.region.min_lon,
            self.region.max_lon,
            z,
        );

        let mut pipeline = self.cache.pipeline();
        let mut written = 0usize;

        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                let points = self.points.clone();
                let mode = self.cluster_mode;
                let clusters = self.pool.run(move || compute_tile(&points, z, x, y, mode)).await;

                if clusters.is_empty() {
                    continue;
                }
                let json = serde_json::to_string(&clusters)?;
                pipeline.setex(&tile_cache_key(z, x, y), TILE_TTL_SECS, &json);
                written += 1;

                if pipeline.len() >= FLUSH_EVERY {
                    pipeline.execute().await;
                }
            }
        }
        pipeline.execute().await;

        tracing::info!(z, tiles_written = written, "precompute sweep complete for zoom level");
        Ok(())
    }
}
