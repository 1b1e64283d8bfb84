// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for chat server integration tests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley::attachment_store::AttachmentStore;
use parley::auth::{Identity, TokenVerifier};
use parley::client::HistoryFetcher;
use parley::connection_registry::ConnectionRegistry;
use parley::handler::ConnectionDeps;
use parley::http::{create_router, HttpState};
use parley::message_store::{MemoryMessageStore, MessageStore};
use parley::metrics::ChatMetrics;
use parley::presence::PresenceBroadcaster;
use parley::protocol::WireMessage;
use parley::router::MessageRouter;
use parley::server;
use parley::user_store::MemoryUserStore;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running chat server on ephemeral ports, with direct handles to its
/// shared state for assertions.
#[allow(dead_code)]
pub struct TestServer {
    pub ws_url: String,
    pub registry: Arc<ConnectionRegistry>,
    pub messages: Arc<dyn MessageStore>,
    pub attachments: Arc<AttachmentStore>,
    pub verifier: TokenVerifier,
    pub metrics: ChatMetrics,
    pub http: axum::Router,
    _attachment_dir: tempfile::TempDir,
}

/// Starts a server with the default (slow) heartbeat so liveness never
/// interferes with short tests.
#[allow(dead_code)]
pub async fn spawn_server() -> TestServer {
    spawn_server_with_heartbeat(Duration::from_secs(30), Duration::from_secs(5)).await
}

/// Starts a server with explicit heartbeat timings.
#[allow(dead_code)]
pub async fn spawn_server_with_heartbeat(
    heartbeat_interval: Duration,
    probe_timeout: Duration,
) -> TestServer {
    let attachment_dir = tempfile::tempdir().unwrap();

    let metrics = ChatMetrics::new();
    let registry = Arc::new(ConnectionRegistry::new());
    let messages: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let attachments = Arc::new(AttachmentStore::open(attachment_dir.path()).unwrap());
    let verifier = TokenVerifier::new("integration-test-secret", Duration::from_secs(3600));
    let presence = PresenceBroadcaster::new(registry.clone(), metrics.clone());
    let router = MessageRouter::new(
        registry.clone(),
        messages.clone(),
        attachments.clone(),
        metrics.clone(),
    );

    let deps = ConnectionDeps {
        registry: registry.clone(),
        router,
        presence,
        verifier: verifier.clone(),
        metrics: metrics.clone(),
        heartbeat_interval,
        probe_timeout,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, deps, 16 * 1024 * 1024));

    let http = create_router(HttpState {
        users: Arc::new(MemoryUserStore::new()),
        messages: messages.clone(),
        attachments: attachments.clone(),
        verifier: verifier.clone(),
        metrics: metrics.clone(),
        metrics_token: None,
    });

    TestServer {
        ws_url: format!("ws://{}", addr),
        registry,
        messages,
        attachments,
        verifier,
        metrics,
        http,
        _attachment_dir: attachment_dir,
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Mints a valid credential for the given identity.
    pub fn mint_token(&self, id: &str, username: &str) -> String {
        self.verifier
            .issue(&Identity {
                id: id.to_string(),
                username: username.to_string(),
            })
            .unwrap()
    }

    /// Opens a WebSocket connection carrying the given token cookie.
    pub async fn connect(&self, token: &str) -> WsClient {
        let mut request = self.ws_url.as_str().into_client_request().unwrap();
        request.headers_mut().insert(
            "cookie",
            HeaderValue::from_str(&format!("token={}", token)).unwrap(),
        );
        let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        ws
    }

    /// Opens a WebSocket connection without any credential.
    #[allow(dead_code)]
    pub async fn connect_anonymous(&self) -> WsClient {
        let request = self.ws_url.as_str().into_client_request().unwrap();
        let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        ws
    }
}

/// Reads the next JSON frame, answering liveness pings along the way.
#[allow(dead_code)]
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload)).await.unwrap();
            }
            _ => {}
        }
    }
}

/// Extracts the sorted usernames of a presence frame; panics on any other
/// frame shape.
#[allow(dead_code)]
pub fn presence_usernames(frame: &serde_json::Value) -> Vec<String> {
    let mut names: Vec<String> = frame["online"]
        .as_array()
        .expect("expected a presence frame")
        .iter()
        .map(|e| e["username"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

/// Reads frames until a presence snapshot with exactly the expected
/// usernames arrives; panics if a delivery shows up first.
#[allow(dead_code)]
pub async fn expect_presence(ws: &mut WsClient, expected: &[&str]) {
    let frame = next_json(ws).await;
    assert!(
        frame.get("online").is_some(),
        "expected presence frame, got: {}",
        frame
    );
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(presence_usernames(&frame), expected);
}

/// History fetcher backed directly by the server's message store.
#[allow(dead_code)]
pub struct StoreFetcher {
    pub messages: Arc<dyn MessageStore>,
    pub own_id: String,
}

impl HistoryFetcher for StoreFetcher {
    fn conversation(&self, peer_id: &str) -> BoxFuture<'_, Result<Vec<WireMessage>, String>> {
        let peer_id = peer_id.to_string();
        Box::pin(async move {
            self.messages
                .conversation(&self.own_id, &peer_id)
                .map(|msgs| msgs.iter().map(WireMessage::history).collect())
                .map_err(|e| e.to_string())
        })
    }
}
