//! Immutable columnar point store (component B). Loaded once at startup,
//! never mutated afterwards; `filter_bbox` is cheap to call concurrently
//! from many threads since it only clones `Arc`-backed values.
//!
//! Grounded on the teacher's `DbPools` (a cheaply `Clone`-able, thread-safe
//! handle over shared storage) and the original Polars point source
//! (`main.py`'s in-memory `PROPERTIES_DF`, loaded once via
//! `load_db_to_memory_sync` and never mutated for the life of the process).

use smartstring::{LazyCompact, SmartString};
use std::sync::Arc;

pub type SString = SmartString<LazyCompact>;

/// A single geographic property record. See spec.md §3 for the invariants
/// this type must uphold before entering a `PointStore` (invariant P1).
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: SString,
    pub latitude: f64,
    pub longitude: f64,
    pub days_on_market: Option<i32>,
    pub margin: Option<f64>,
    pub type_local: Option<SString>,
    pub address: Option<SString>,
}

impl Point {
    /// Invariant P1: finite, non-null latitude in [-90, 90] and longitude in
    /// [-180, 180]. Points failing this are dropped at load.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Read-only, shared point collection. Cloning a `PointStore` is an `Arc`
/// bump, so it can be handed to every request handler and background task
/// without contention.
#[derive(Debug, Clone)]
pub struct PointStore {
    points: Arc<Vec<Point>>,
}

/// A cheap view over a subset of a `PointStore`'s points, produced by
/// `filter_bbox`. Holds references borrowed from the backing `Arc<Vec<Point>>`
/// so building a view never copies point data.
pub struct PointView<'a> {
    points: Vec<&'a Point>,
}

impl<'a> PointView<'a> {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Point> + '_ {
        self.points.iter().copied()
    }

    pub fn as_slice(&self) -> &[&'a Point] {
        &self.points
    }
}

impl PointStore {
    /// Builds a store from raw points, dropping any failing invariant P1 and
    /// logging how many were dropped.
    pub fn new(raw_points: Vec<Point>) -> Self {
        let total = raw_points.len();
        let points: Vec<Point> = raw_points.into_iter().filter(Point::is_valid).collect();
        let dropped = total - points.len();
        if dropped > 0 {
            tracing::warn!(dropped, total, "dropped points failing P1 at load");
        }
        tracing::info!(count = points.len(), "point store loaded");

        Self {
            points: Arc::new(points),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns a view containing exactly the points inside the closed
    /// rectangle `[min_lat, max_lat] x [min_lon, max_lon]`.
    pub fn filter_bbox(&self, min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> PointView<'_> {
        let points = self
            .points
            .iter()
            .filter(|p| {
                p.latitude >= min_lat
                    && p.latitude <= max_lat
                    && p.longitude >= min_lon
                    && p.longitude <= max_lon
            })
            .collect();
        PointView { points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn drops_points_failing_p1() {
        let store = PointStore::new(vec![
            point("p1", 48.85, 2.35),
            point("bad-lat", 91.0, 2.35),
            point("bad-lon", 48.85, 200.0),
            point("nan", f64::NAN, 2.35),
        ]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn filter_bbox_is_exact() {
        let store = PointStore::new(vec![
            point("p1", 48.85, 2.35),
            point("p2", 48.86, 2.36),
            point("p3", 43.30, 5.40),
        ]);
        let view = store.filter_bbox(48.8, 48.9, 2.3, 2.4);
        let ids: Vec<&str> = view.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"p1"));
        assert!(ids.contains(&"p2"));
    }

    #[test]
    fn filter_bbox_boundary_is_closed() {
        let store = PointStore::new(vec![point("edge", 10.0, 10.0)]);
        let view = store.filter_bbox(10.0, 10.0, 10.0, 10.0);
        assert_eq!(view.len(), 1);
    }
}
