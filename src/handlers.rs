//! HTTP handlers for the viewport/tile/status API. Query-parameter
//! validation and response shaping follow the teacher's `tiles::get_tile`
//! style (`Result<impl IntoResponse, ApiError>`, explicit `Cache-Control`
//! headers) generalized from a single tile route to this service's
//! viewport, tile, and status routes.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api_constants::{TILE_CACHE_CONTROL, VIEWPORT_CACHE_CONTROL};
use crate::cluster::Cluster;
use crate::error::ApiError;
use crate::supervisor::AppState;

#[derive(Debug, Deserialize)]
pub struct MarkersQuery {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    pub zoom: f64,
}

#[derive(Debug, Serialize)]
pub struct MarkersResponse {
    pub clusters: Vec<Cluster>,
}

fn validate_bbox(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<(), ApiError> {
    if ![min_lat, max_lat, min_lon, max_lon].iter().all(|v| v.is_finite()) {
        return Err(ApiError::bad_request("bbox coordinates must be finite numbers"));
    }
    if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
        return Err(ApiError::bad_request("latitude must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
        return Err(ApiError::bad_request("longitude must be between -180 and 180"));
    }
    if min_lat > max_lat {
        return Err(ApiError::bad_request("min_lat must not exceed max_lat"));
    }
    if min_lon > max_lon {
        return Err(ApiError::bad_request("min_lon must not exceed max_lon"));
    }
    Ok(())
}

/// Floors a fractional zoom into the supported integer range, per spec's
/// `req_z = clamp(floor(zoom), Z_MIN, Z_MAX)`. Rejects non-finite input
/// rather than silently clamping it.
fn parse_zoom(zoom: f64) -> Result<u32, ApiError> {
    if !zoom.is_finite() {
        return Err(ApiError::bad_request("zoom must be a finite number"));
    }
    Ok(zoom.floor().clamp(0.0, u32::MAX as f64) as u32)
}

pub async fn get_markers(
    State(state): State<AppState>,
    Query(query): Query<MarkersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_bbox(query.min_lat, query.max_lat, query.min_lon, query.max_lon)?;
    let zoom = parse_zoom(query.zoom)?;

    let clusters = state
        .viewport
        .get_markers(query.min_lat, query.max_lat, query.min_lon, query.max_lon, zoom)
        .await;

    Ok((
        [(header::CACHE_CONTROL, VIEWPORT_CACHE_CONTROL)],
        Json(MarkersResponse { clusters }),
    ))
}

pub async fn get_tile(
    State(state): State<AppState>,
    Path((z, x, y)): Path<(u32, u32, u32)>,
) -> Result<impl IntoResponse, ApiError> {
    if !(crate::geo::Z_MIN..=crate::geo::Z_MAX).contains(&z) {
        return Err(ApiError::bad_request(format!(
            "zoom must be between {} and {}",
            crate::geo::Z_MIN,
            crate::geo::Z_MAX
        )));
    }

    let clusters = state.tiles.get_tile(z, x, y).await;

    Ok((
        [(header::CACHE_CONTROL, TILE_CACHE_CONTROL)],
        Json(MarkersResponse { clusters }),
    ))
}

#[derive(Debug, Serialize)]
pub struct PrecomputeStatusResponse {
    pub running: bool,
    pub completed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub api_ready: bool,
    pub precompute: PrecomputeStatusResponse,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.status.snapshot();
    Json(StatusResponse {
        // AppState only exists once build_state's dataset load has succeeded.
        api_ready: true,
        precompute: PrecomputeStatusResponse {
            running: status.running,
            completed: status.completed,
            error: status.error,
        },
    })
}

pub async fn index() -> impl IntoResponse {
    Html("<html><body><p>viewport-cache is running.</p></body></html>")
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_bbox() {
        assert!(validate_bbox(f64::NAN, 51.0, -5.0, 10.0).is_err());
    }

    #[test]
    fn rejects_inverted_bbox() {
        assert!(validate_bbox(51.0, 41.0, -5.0, 10.0).is_err());
    }

    #[test]
    fn floors_fractional_zoom() {
        assert_eq!(parse_zoom(13.7).unwrap(), 13);
    }

    #[test]
    fn rejects_non_finite_zoom() {
        assert!(parse_zoom(f64::NAN).is_err());
        assert!(parse_zoom(f64::INFINITY).is_err());
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(validate_bbox(-100.0, 51.0, -5.0, 10.0).is_err());
    }

    #[test]
    fn accepts_valid_bbox() {
        assert!(validate_bbox(41.0, 51.0, -5.0, 10.0).is_ok());
    }
}
