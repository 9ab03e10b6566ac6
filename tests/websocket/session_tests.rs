//! Presence Session Tests
//!
//! Raw sockets against a live server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::common::{
    eventually, next_json, next_of_type, online_ids, test_settings, TestServer,
};

#[tokio::test]
async fn test_join_and_leave_are_announced() {
    let server = TestServer::spawn().await;

    let mut alice = server.connect("u1", "Alice").await;
    let success = next_json(&mut alice).await;
    assert_eq!(success["type"], "connection_success");
    assert_eq!(success["userId"], "u1");
    assert_eq!(success["username"], "Alice");
    let update = next_of_type(&mut alice, "status_update").await;
    assert_eq!(online_ids(&update), vec!["u1"]);

    let mut bob = server.connect("u2", "Bob").await;
    let update = next_of_type(&mut alice, "status_update").await;
    assert_eq!(online_ids(&update), vec!["u1", "u2"]);
    assert_eq!(update["data"][1]["isOnline"], true);
    let update = next_of_type(&mut bob, "status_update").await;
    assert_eq!(online_ids(&update), vec!["u1", "u2"]);

    bob.close(None).await.unwrap();
    let update = next_of_type(&mut alice, "status_update").await;
    assert_eq!(online_ids(&update), vec!["u1"]);
    assert!(eventually(|| server.state.registry.len() == 1).await);
}

#[tokio::test]
async fn test_ping_is_answered_with_echoed_time() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("u1", "Alice").await;
    next_of_type(&mut alice, "status_update").await;

    let ping = json!({ "type": "ping", "userId": "u1", "timestamp": 1_700_000_000_000_i64 });
    alice
        .send(Message::Text(ping.to_string().into()))
        .await
        .unwrap();

    let pong = next_of_type(&mut alice, "pong").await;
    assert_eq!(pong["userId"], "u1");
    assert_eq!(pong["originalPingTime"], 1_700_000_000_000_i64);
    assert!(pong["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_missing_identity_is_closed_without_payload() {
    let server = TestServer::spawn().await;
    let (mut ws, _) = connect_async(format!("{}?userId=u1", server.ws_url()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("server did not close the socket");

    assert!(
        matches!(frame, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "unexpected frame: {:?}",
        frame
    );
    assert_eq!(server.state.registry.len(), 0);
}

#[tokio::test]
async fn test_chat_is_relayed_verbatim_to_everyone() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("u1", "Alice").await;
    next_of_type(&mut alice, "status_update").await;
    let mut bob = server.connect("u2", "Bob").await;
    next_of_type(&mut bob, "status_update").await;
    next_of_type(&mut alice, "status_update").await;

    let raw = r#"{"type":"chat_message","userId":"u1","username":"Alice","message":"hi","timestamp":5,"extra":true}"#;
    alice.send(Message::Text(raw.into())).await.unwrap();

    for ws in [&mut alice, &mut bob] {
        let chat = next_of_type(ws, "chat_message").await;
        assert_eq!(chat["message"], "hi");
        assert_eq!(chat["extra"], true);
    }
}

#[tokio::test]
async fn test_malformed_frames_keep_the_session_alive() {
    let server = TestServer::spawn().await;
    let mut alice = server.connect("u1", "Alice").await;
    next_of_type(&mut alice, "status_update").await;

    alice.send(Message::Text("not json".into())).await.unwrap();
    alice
        .send(Message::Text(r#"{"type":"typing"}"#.into()))
        .await
        .unwrap();
    alice
        .send(Message::Text(r#"{"type":"ping","timestamp":7}"#.into()))
        .await
        .unwrap();

    let pong = next_of_type(&mut alice, "pong").await;
    assert_eq!(pong["originalPingTime"], 7);
    assert_eq!(pong["userId"], "u1");
}

#[tokio::test]
async fn test_reconnecting_user_replaces_old_socket() {
    let server = TestServer::spawn().await;
    let mut first = server.connect("u1", "Alice").await;
    next_of_type(&mut first, "status_update").await;

    let mut second = server.connect("u1", "Alice").await;
    next_of_type(&mut second, "connection_success").await;

    // the replaced socket is closed by the server
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    // and its teardown must not evict the new registration
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.state.registry.len(), 1);
    let ping = json!({ "type": "ping", "timestamp": 11 });
    second
        .send(Message::Text(ping.to_string().into()))
        .await
        .unwrap();
    let pong = next_of_type(&mut second, "pong").await;
    assert_eq!(pong["originalPingTime"], 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_connection_success_is_first_frame_under_concurrent_joins() {
    let server = TestServer::spawn().await;

    for round in 0..5 {
        let joins = (0..16).map(|i| {
            let url = format!(
                "{}?userId=r{}-u{}&username=user{}",
                server.ws_url(),
                round,
                i,
                i
            );
            tokio::spawn(async move {
                let (mut ws, _) = connect_async(url).await.unwrap();
                let first = next_json(&mut ws).await;
                (first, ws)
            })
        });

        let sockets = futures::future::join_all(joins).await;
        for joined in sockets {
            let (first, _ws) = joined.unwrap();
            assert_eq!(first["type"], "connection_success", "first frame: {}", first);
        }
    }
}

#[tokio::test]
async fn test_repeated_query_keys_still_upgrade() {
    let server = TestServer::spawn().await;
    let url = format!("{}?userId=a&userId=b&username=x&extra=1", server.ws_url());

    let (mut ws, _) = connect_async(url).await.expect("upgrade refused");

    let success = next_json(&mut ws).await;
    assert_eq!(success["type"], "connection_success");
    assert_eq!(success["userId"], "a");
    assert_eq!(success["username"], "x");
}

#[tokio::test]
async fn test_silent_socket_is_reaped_soon_after_idle_timeout() {
    let mut settings = test_settings();
    settings.websocket.idle_timeout_ms = 400;
    let server = TestServer::spawn_with(settings).await;

    let mut silent = server.connect("u1", "Alice").await;
    next_of_type(&mut silent, "status_update").await;
    let connected = tokio::time::Instant::now();

    let mut reaped = false;
    while connected.elapsed() < Duration::from_millis(750) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if server.state.registry.get("u1").is_none() {
            reaped = true;
            break;
        }
    }

    assert!(reaped, "idle socket outlived its timeout");
    assert!(connected.elapsed() >= Duration::from_millis(350));
}
