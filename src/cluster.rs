//! Clustering (component C): aggregates a point subset into cluster records
//! at the resolution implied by zoom. Two interchangeable modes are
//! implemented — a dependency-free rectangular grid (Mode G) and hexagonal
//! H3 binning (Mode H) — selected once at startup via `CLUSTER_MODE` and
//! held consistent across the tile cache and on-the-fly paths (mixing modes
//! would invalidate stored tiles).
//!
//! Grid mode is grounded on the original Python service's pandas
//! implementation (`pandas/main_pandas.py`'s `groupby(['lat_idx',
//! 'lon_idx'])` aggregation); H3 mode is grounded on its Polars counterpart
//! (`utils.py`'s `cluster_by_h3`), reimplemented with the `h3o` crate.

use std::collections::HashMap;

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::points::{PointView, SString};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    Grid,
    H3,
}

/// A cluster record: one or more points aggregated into a single grid or H3
/// cell. When `count == 1` the optional representative fields are
/// authoritative for that point; when `count > 1` they are aggregate
/// summaries only (see spec.md §3's Cluster record and invariant C1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub latitude: f64,
    pub longitude: f64,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat_idx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon_idx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<SString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_local: Option<SString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<SString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lon: Option<f64>,
}

/// Per-tile cap on individual (uncluster) points returned at `z >= 14`.
const MAX_LEAF_POINTS: usize = 500;
const GRID_EPSILON: f64 = 1e-4;

/// Entry point dispatched on the configured mode. `bbox` is `(min_lat,
/// max_lat, min_lon, max_lon)` — the tile's bbox in grid mode, used to scale
/// the grid; unused in H3 mode.
pub fn cluster_points(
    view: &PointView<'_>,
    zoom: u32,
    bbox: (f64, f64, f64, f64),
    mode: ClusterMode,
) -> Vec<Cluster> {
    if view.is_empty() {
        return Vec::new();
    }

    if zoom >= 14 {
        return view
            .iter()
            .take(MAX_LEAF_POINTS)
            .map(leaf_cluster)
            .collect();
    }

    match mode {
        ClusterMode::Grid => cluster_by_grid(view, zoom, bbox),
        ClusterMode::H3 => cluster_by_h3(view, zoom),
    }
}

fn leaf_cluster(p: &crate::points::Point) -> Cluster {
    Cluster {
        latitude: p.latitude,
        longitude: p.longitude,
        count: 1,
        lat_idx: None,
        lon_idx: None,
        id: Some(p.id.clone()),
        margin: p.margin,
        type_local: p.type_local.clone(),
        address: p.address.clone(),
        min_lat: None,
        max_lat: None,
        min_lon: None,
        max_lon: None,
    }
}

fn grid_resolution(zoom: u32) -> u32 {
    if zoom <= 6 {
        3
    } else if zoom <= 8 {
        5
    } else if zoom <= 10 {
        7
    } else {
        10
    }
}

struct GridGroup<'a> {
    lat_sum: f64,
    lon_sum: f64,
    count: u32,
    first: &'a crate::points::Point,
    margin: Option<f64>,
}

fn cluster_by_grid(view: &PointView<'_>, zoom: u32, bbox: (f64, f64, f64, f64)) -> Vec<Cluster> {
    let (min_lat, max_lat, min_lon, max_lon) = bbox;
    let resolution = grid_resolution(zoom);
    let lat_step = (max_lat - min_lat).max(GRID_EPSILON) / f64::from(resolution);
    let lon_step = (max_lon - min_lon).max(GRID_EPSILON) / f64::from(resolution);

    let mut groups: HashMap<(u32, u32), GridGroup<'_>> = HashMap::new();
    for p in view.iter() {
        let lat_idx = (((p.latitude - min_lat) / lat_step).floor().max(0.0)) as u32;
        let lon_idx = (((p.longitude - min_lon) / lon_step).floor().max(0.0)) as u32;

        groups
            .entry((lat_idx, lon_idx))
            .and_modify(|g| {
                g.lat_sum += p.latitude;
                g.lon_sum += p.longitude;
                g.count += 1;
                g.margin = max_margin(g.margin, p.margin);
            })
            .or_insert_with(|| GridGroup {
                lat_sum: p.latitude,
                lon_sum: p.longitude,
                count: 1,
                first: p,
                margin: p.margin,
            });
    }

    let mut clusters: Vec<Cluster> = groups
        .into_iter()
        .map(|((lat_idx, lon_idx), g)| Cluster {
            latitude: g.lat_sum / f64::from(g.count),
            longitude: g.lon_sum / f64::from(g.count),
            count: g.count,
            lat_idx: Some(lat_idx),
            lon_idx: Some(lon_idx),
            id: Some(g.first.id.clone()),
            margin: g.margin,
            type_local: g.first.type_local.clone(),
            address: g.first.address.clone(),
            min_lat: None,
            max_lat: None,
            min_lon: None,
            max_lon: None,
        })
        .collect();

    sort_descending_by_count(&mut clusters);
    clusters
}

fn max_margin(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn sort_descending_by_count(clusters: &mut [Cluster]) {
    clusters.sort_by(|a, b| b.count.cmp(&a.count));
}

/// Maps zoom to an H3 resolution per the table in spec.md §4.3, clamped to
/// `[5, 9]`.
fn zoom_to_h3_resolution(zoom: u32) -> Resolution {
    let res = match zoom {
        0..=6 => 5,
        7 | 8 => 6,
        9 | 10 => 7,
        11 | 12 => 8,
        _ => 9,
    };
    let res = res.clamp(5, 9);
    Resolution::try_from(res as u8).unwrap_or(Resolution::Five)
}

struct H3Group<'a> {
    lat_sum: f64,
    lon_sum: f64,
    count: u32,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    first: &'a crate::points::Point,
    margin: Option<f64>,
}

fn cluster_by_h3(view: &PointView<'_>, zoom: u32) -> Vec<Cluster> {
    let resolution = zoom_to_h3_resolution(zoom);
    let mut groups: HashMap<CellIndex, H3Group<'_>> = HashMap::new();

    for p in view.iter() {
        let Ok(latlng) = LatLng::new(p.latitude, p.longitude) else {
            continue;
        };
        let cell = latlng.to_cell(resolution);

        groups
            .entry(cell)
            .and_modify(|g| {
                g.lat_sum += p.latitude;
                g.lon_sum += p.longitude;
                g.count += 1;
                g.min_lat = g.min_lat.min(p.latitude);
                g.max_lat = g.max_lat.max(p.latitude);
                g.min_lon = g.min_lon.min(p.longitude);
                g.max_lon = g.max_lon.max(p.longitude);
                g.margin = max_margin(g.margin, p.margin);
            })
            .or_insert_with(|| H3Group {
                lat_sum: p.latitude,
                lon_sum: p.longitude,
                count: 1,
                min_lat: p.latitude,
                max_lat: p.latitude,
                min_lon: p.longitude,
                max_lon: p.longitude,
                first: p,
                margin: p.margin,
            });
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .map(|g| Cluster {
            latitude: g.lat_sum / f64::from(g.count),
            longitude: g.lon_sum / f64::from(g.count),
            count: g.count,
            lat_idx: None,
            lon_idx: None,
            id: Some(g.first.id.clone()),
            margin: g.margin,
            type_local: g.first.type_local.clone(),
            address: g.first.address.clone(),
            min_lat: Some(g.min_lat),
            max_lat: Some(g.max_lat),
            min_lon: Some(g.min_lon),
            max_lon: Some(g.max_lon),
        })
        .collect();

    sort_descending_by_count(&mut clusters);
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::{Point, PointStore};

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
    fn empty_input_yields_empty_output() {
        let store = PointStore::new(vec![]);
        let view = store.filter_bbox(-90.0, 90.0, -180.0, 180.0);
        assert!(cluster_points(&view, 6, (40.0, 50.0, 0.0, 10.0), ClusterMode::Grid).is_empty());
        assert!(cluster_points(&view, 6, (40.0, 50.0, 0.0, 10.0), ClusterMode::H3).is_empty());
    }

    #[test]
    fn conserves_count_grid_mode() {
        let store = PointStore::new(vec![
            point("p1", 48.85, 2.35),
            point("p2", 48.86, 2.36),
            point("p3", 43.30, 5.40),
        ]);
        let view = store.filter_bbox(-90.0, 90.0, -180.0, 180.0);
        let clusters = cluster_points(&view, 6, (41.0, 51.0, -5.0, 10.0), ClusterMode::Grid);
        let total: u32 = clusters.iter().map(|c| c.count).sum();
        assert_eq!(total as usize, view.len());
    }

    #[test]
    fn conserves_count_h3_mode() {
        let store = PointStore::new(vec![
            point("p1", 48.85, 2.35),
            point("p2", 48.86, 2.36),
            point("p3", 43.30, 5.40),
        ]);
        let view = store.filter_bbox(-90.0, 90.0, -180.0, 180.0);
        let clusters = cluster_points(&view, 6, (41.0, 51.0, -5.0, 10.0), ClusterMode::H3);
        let total: u32 = clusters.iter().map(|c| c.count).sum();
        assert_eq!(total as usize, view.len());
    }

    #[test]
    fn single_point_cell_reports_count_one() {
        let store = PointStore::new(vec![point("solo", 43.30, 5.40)]);
        let view = store.filter_bbox(-90.0, 90.0, -180.0, 180.0);
        let clusters = cluster_points(&view, 6, (41.0, 51.0, -5.0, 10.0), ClusterMode::Grid);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].count, 1);
        assert_eq!(clusters[0].id.as_deref(), Some("solo"));
    }

    #[test]
    fn leaf_zoom_caps_at_500_points() {
        let points: Vec<Point> = (0..600)
            .map(|i| point(&format!("p{i}"), 48.0 + (i as f64) * 0.0001, 2.0))
            .collect();
        let store = PointStore::new(points);
        let view = store.filter_bbox(-90.0, 90.0, -180.0, 180.0);
        let clusters = cluster_points(&view, 14, (47.0, 49.0, 1.0, 3.0), ClusterMode::Grid);
        assert_eq!(clusters.len(), 500);
        assert!(clusters.iter().all(|c| c.count == 1));
    }

    #[test]
    fn clusters_sorted_descending_by_count() {
        let mut points = vec![point("a", 48.85, 2.35), point("b", 48.85, 2.35)];
        points.push(point("c", 43.30, 5.40));
        let store = PointStore::new(points);
        let view = store.filter_bbox(-90.0, 90.0, -180.0, 180.0);
        let clusters = cluster_points(&view, 6, (41.0, 51.0, -5.0, 10.0), ClusterMode::Grid);
        for pair in clusters.windows(2) {
            assert!(pair[0].count >= pair[1].count);
        }
    }
}
