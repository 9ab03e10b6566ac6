//! Presence API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use presence_server::presentation::websocket::SocketHandle;

use crate::common::TestApp;

#[tokio::test]
async fn test_online_users_empty() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/api/users/online").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_online_users_lists_registry_in_connection_order() {
    let app = TestApp::new();
    let (first, _rx1) = SocketHandle::channel();
    let (second, _rx2) = SocketHandle::channel();
    app.state.registry.register("u1", "Alice", first);
    app.state.registry.register("u2", "Bob", second);

    let (status, body) = app.get_json("/api/users/online").await;

    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["userId"], "u1");
    assert_eq!(users[0]["username"], "Alice");
    assert_eq!(users[0]["isOnline"], true);
    assert_eq!(users[1]["userId"], "u2");
    assert!(users[1]["lastSeen"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_user_presence_online() {
    let app = TestApp::new();
    let (socket, _rx) = SocketHandle::channel();
    app.state.registry.register("u1", "Alice", socket);

    let (status, body) = app.get_json("/api/users/u1/presence").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "u1");
    assert_eq!(body["isOnline"], true);
    assert!(body["connectedAt"].as_str().is_some());
}

#[tokio::test]
async fn test_user_presence_offline_is_not_found() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/api/users/ghost/presence").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 10001);
}
