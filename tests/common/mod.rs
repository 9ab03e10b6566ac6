//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use futures::StreamExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use presence_server::config::{
    ClientSettings, CorsSettings, ServerSettings, Settings, WebSocketSettings,
};
use presence_server::startup::{build_router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings suitable for tests, independent of files and environment
pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        websocket: WebSocketSettings {
            max_message_size: 65536,
            max_frame_size: 16384,
            idle_timeout_ms: 90_000,
        },
        cors: CorsSettings {
            allowed_origins: vec!["http://localhost:8080".into()],
        },
        client: ClientSettings::default(),
        environment: "test".into(),
    }
}

/// Test application driven through `oneshot`, without a socket
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let state = AppState::new(test_settings());
        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    /// Make a GET request to the application
    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// GET and parse the body as JSON
    pub async fn get_json(&self, uri: &str) -> (axum::http::StatusCode, Value) {
        let response = self.get(uri).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

/// A server bound to an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_settings()).await
    }

    pub async fn spawn_with(settings: Settings) -> Self {
        let state = AppState::new(settings);
        let router = build_router(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Open a raw socket with the given identity
    pub async fn connect(&self, user_id: &str, username: &str) -> WsClient {
        let url = format!("{}?userId={}&username={}", self.ws_url(), user_id, username);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    pub fn client_settings(&self, user_id: &str, username: &str) -> ClientSettings {
        ClientSettings {
            url: self.ws_url(),
            user_id: user_id.into(),
            username: username.into(),
            ping_interval_ms: 50,
            pong_timeout_ms: 1_000,
            retry_delay_ms: 20,
            max_retry_delay_ms: 100,
            ..ClientSettings::default()
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Next text frame as JSON; panics on close or timeout
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(Message::Close(_))) | None => panic!("socket closed"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("socket error: {}", e),
        }
    }
}

/// Skip frames until one with the given `type` arrives
pub async fn next_of_type(ws: &mut WsClient, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

/// Online user ids of a `status_update` frame
pub fn online_ids(update: &Value) -> Vec<String> {
    update["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["userId"].as_str().unwrap().to_string())
        .collect()
}

/// Poll `condition` until it holds or the timeout expires
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
