//! Heartbeat Client Tests
//!
//! The tokio runtime client against a live server.

use std::time::Duration;

use presence_server::client::{self, ClientConnectionState, Quality};
use presence_server::config::ClientSettings;
use presence_server::shared::protocol::WireMessage;

use crate::common::{eventually, TestServer};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_client_connects_and_measures_latency() {
    let server = TestServer::spawn().await;
    let (handle, mut messages) = client::spawn(server.client_settings("c1", "Carol")).unwrap();

    let mut snapshots = handle.subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.stats.total_pongs >= 2))
        .await
        .expect("no pongs within timeout")
        .unwrap();

    let snapshot = handle.snapshot();
    assert!(snapshot.state.is_connected());
    assert_ne!(snapshot.quality, Quality::Disconnected);
    assert!(snapshot.last_rtt_ms.is_some());
    assert!(snapshot.stats.total_pings >= snapshot.stats.total_pongs);

    let update = tokio::time::timeout(WAIT, messages.recv())
        .await
        .unwrap()
        .unwrap();
    match update {
        WireMessage::StatusUpdate(update) => {
            assert!(update.data.iter().any(|entry| entry.user_id == "c1"));
        }
        other => panic!("expected status_update, got {:?}", other),
    }
    assert!(server.state.registry.get("c1").is_some());

    handle.shutdown().await;
    assert!(eventually(|| server.state.registry.is_empty()).await);
}

#[tokio::test]
async fn test_disconnect_stops_reconnecting() {
    let server = TestServer::spawn().await;
    let (handle, _messages) = client::spawn(server.client_settings("c2", "Dave")).unwrap();
    let mut snapshots = handle.subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.state.is_connected()))
        .await
        .unwrap()
        .unwrap();

    handle.disconnect().unwrap();

    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.state.is_closed()))
        .await
        .unwrap()
        .unwrap();
    assert!(eventually(|| server.state.registry.is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.state.registry.is_empty());
    assert_eq!(handle.snapshot().quality, Quality::Disconnected);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_client_gives_up_after_max_retries() {
    // bind and drop a listener to get a port nothing listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let settings = ClientSettings {
        url: format!("ws://{}/ws", addr),
        user_id: "c3".into(),
        username: "Erin".into(),
        max_retries: 2,
        retry_delay_ms: 10,
        max_retry_delay_ms: 20,
        pong_timeout_ms: 500,
        ..ClientSettings::default()
    };
    let (handle, _messages) = client::spawn(settings).unwrap();
    let mut snapshots = handle.subscribe();

    let closed = tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.state.is_closed()))
        .await
        .unwrap()
        .unwrap()
        .clone();

    assert_eq!(
        closed.state,
        ClientConnectionState::Closed("max retries exceeded".into())
    );
    assert_eq!(closed.quality, Quality::Disconnected);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_resets_counters() {
    let server = TestServer::spawn().await;
    let (handle, _messages) = client::spawn(server.client_settings("c4", "Frank")).unwrap();
    let mut snapshots = handle.subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.stats.total_pongs >= 3))
        .await
        .unwrap()
        .unwrap();

    handle.reconnect().unwrap();

    // counters restart from zero on the new socket
    tokio::time::timeout(
        WAIT,
        snapshots.wait_for(|s| s.state.is_connected() && s.stats.total_pongs < 3),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(eventually(|| server.state.registry.get("c4").is_some()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.state.registry.get("c4").is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_uptime_advances_between_heartbeats() {
    let server = TestServer::spawn().await;
    let settings = ClientSettings {
        ping_interval_ms: 60_000,
        ..server.client_settings("c5", "Grace")
    };
    let (handle, _messages) = client::spawn(settings).unwrap();
    let mut snapshots = handle.subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.state.is_connected()))
        .await
        .unwrap()
        .unwrap();

    // no heartbeat fires in this window, so nothing is republished
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = handle.snapshot();
    assert!(snapshot.state.is_connected());
    assert!(
        snapshot.stats.connection_uptime_ms >= 250,
        "uptime {}ms",
        snapshot.stats.connection_uptime_ms
    );

    handle.shutdown().await;
}
