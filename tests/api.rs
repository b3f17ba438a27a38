//! Full-router integration tests over a fixed, tiny point set — three
//! properties spread across France so bbox/tile/zoom edge cases are
//! exercisable without a real dataset or Redis instance.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use viewport_cache::cluster::ClusterMode;
use viewport_cache::points::Point;
use viewport_cache::supervisor;

fn point(id: &str, lat: f64, lon: f64) -> Point {
    Point {
        id: id.into(),
        latitude: lat,
        longitude: lon,
        days_on_market: Some(12),
        margin: Some(0.2),
        type_local: Some("Appartement".into()),
        address: Some("1 Rue de Rivoli".into()),
    }
}

fn test_dataset() -> Vec<Point> {
    vec![
        point("p1", 48.8566, 2.3522),  // Paris
        point("p2", 48.8570, 2.3530),  // Paris, a few meters from p1
        point("p3", 43.2965, 5.3698),  // Marseille
    ]
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn markers_over_full_extent_returns_all_three_points() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/markers?min_lat=40&max_lat=51&min_lon=-5&max_lon=10&zoom=6")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let clusters = body["clusters"].as_array().unwrap();
    let total: u64 = clusters.iter().map(|c| c["count"].as_u64().unwrap()).sum();
    assert_eq!(total, 3);
}

#[tokio::test]
async fn markers_with_inverted_bbox_is_rejected() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/markers?min_lat=51&max_lat=40&min_lon=-5&max_lon=10&zoom=6")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_parameters");
}

#[tokio::test]
async fn markers_with_out_of_range_latitude_is_rejected() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/markers?min_lat=-500&max_lat=40&min_lon=-5&max_lon=10&zoom=6")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tile_route_returns_clusters_for_paris_tile() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let (x, y) = viewport_cache::geo::latlon_to_tile(48.8566, 2.3522, 10);
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/tiles/10/{x}/{y}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let clusters = body["clusters"].as_array().unwrap();
    assert!(!clusters.is_empty());
}

#[tokio::test]
async fn tile_route_rejects_zoom_outside_supported_range() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/tiles/20/0/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_route_reports_api_ready_and_precompute_state() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["api_ready"], true);
    assert_eq!(body["precompute"]["running"], false);
    assert_eq!(body["precompute"]["completed"], false);
}

#[tokio::test]
async fn health_check_is_ok() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::Grid);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn h3_cluster_mode_also_serves_markers() {
    let state = supervisor::test_state(test_dataset(), ClusterMode::H3);
    let app = viewport_cache::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/markers?min_lat=40&max_lat=51&min_lon=-5&max_lon=10&zoom=6")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let clusters = body["clusters"].as_array().unwrap();
    let total: u64 = clusters.iter().map(|c| c["count"].as_u64().unwrap()).sum();
    assert_eq!(total, 3);
}
