//! Health Check API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use presence_server::presentation::websocket::SocketHandle;

use crate::common::TestApp;

#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connectedClients"], 0);
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_health_counts_registered_connections() {
    let app = TestApp::new();
    let (first, _rx1) = SocketHandle::channel();
    let (second, _rx2) = SocketHandle::channel();
    app.state.registry.register("u1", "Alice", first);
    app.state.registry.register("u2", "Bob", second);

    let (_, body) = app.get_json("/api/health").await;

    assert_eq!(body["connectedClients"], 2);
}

#[tokio::test]
async fn test_liveness() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/health/live").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_text_format() {
    let app = TestApp::new();

    let response = app.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
