// HTTP surface tests: proxy fallback and /__worker routes
// Author: kelexine (https://github.com/kelexine)

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::Harness;
use lazarus_sw::config::{AppConfig, StorageBackend};
use lazarus_sw::server::create_router;
use tower::ServiceExt;

fn config(version: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.version = version.to_string();
    config.cache.backend = StorageBackend::Memory;
    config
}

fn router(h: &Harness, version: &str) -> Router {
    create_router(config(version), h.registration.clone()).unwrap()
}

async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn json(app: Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = send(app, method, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_static_asset_served_through_proxy() {
    let h = Harness::new();
    h.install("v1").await;

    let (status, headers, body) = send(router(&h, "v1"), Method::GET, "/static/style.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-lazarus-source"], "cache");
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(body, b"asset /static/style.css");
}

#[tokio::test]
async fn test_offline_navigation_through_proxy() {
    let h = Harness::new();
    h.install("v1").await;
    h.upstream.set_online(false);

    let (status, headers, body) = send(router(&h, "v1"), Method::GET, "/notes/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-lazarus-source"], "shell");
    assert_eq!(body, b"asset /");
}

#[tokio::test]
async fn test_offline_api_miss_is_bad_gateway() {
    let h = Harness::new();
    h.install("v1").await;
    h.upstream.set_online(false);

    let (status, body) = json(router(&h, "v1"), Method::GET, "/api/notes").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "network_error");
}

#[tokio::test]
async fn test_health_reports_controller() {
    let h = Harness::new();
    h.install("v1").await;

    let (status, body) = json(router(&h, "v1"), Method::GET, "/__worker/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["controller"]["status"], "ok");
}

#[tokio::test]
async fn test_health_unhealthy_without_controller() {
    let h = Harness::new();

    let (_, body) = json(router(&h, "v1"), Method::GET, "/__worker/health").await;
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_status_lists_stores_and_workers() {
    let h = Harness::new();
    h.install("v1").await;

    let (status, body) = json(router(&h, "v1"), Method::GET, "/__worker/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], "v1");
    assert_eq!(body["stores"], serde_json::json!(["v1"]));
    assert_eq!(body["registration"]["controller"], "v1");
    assert_eq!(body["registration"]["active"]["state"], "activated");
}

#[tokio::test]
async fn test_update_installs_configured_version() {
    let h = Harness::new();
    h.install("v1").await;

    let (status, body) = json(router(&h, "v2"), Method::POST, "/__worker/update").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["controller"], "v2");
    assert_eq!(h.store_names().await, vec!["v2"]);
}

#[tokio::test]
async fn test_sync_route() {
    let h = Harness::new();
    h.install("v1").await;

    let (status, body) = json(router(&h, "v1"), Method::POST, "/__worker/sync/sync-notes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], true);

    let (_, body) = json(router(&h, "v1"), Method::POST, "/__worker/sync/other").await;
    assert_eq!(body["handled"], false);
}

#[tokio::test]
async fn test_metrics_exposed() {
    let h = Harness::new();
    h.install("v1").await;
    send(router(&h, "v1"), Method::GET, "/static/style.css").await;

    let (status, _, body) = send(router(&h, "v1"), Method::GET, "/__worker/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("fetch_total"));
}
