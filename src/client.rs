// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Client Session Controller
//!
//! The consuming side of a channel: owns one logical connection to the
//! server, reconnects forever on any close after a fixed backoff (no
//! exponential growth, no retry cap), and keeps the local conversation view
//! in sync with what the server confirms.
//!
//! Locally sent messages are appended optimistically with a provisional id
//! before any server confirmation. After a send that carried an attachment
//! the controller refetches the conversation history and replaces its local
//! view; text-only sends are not followed by a refetch, so their provisional
//! entries persist until the next history load. That asymmetry is part of
//! the product behavior; see the tests that pin it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::protocol::{
    self, FilePayload, PresenceEntry, SendFrame, ServerFrame, WireMessage,
};

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the server (`ws://...`).
    pub url: String,
    /// Credential token carried as the `token` cookie on the handshake.
    pub token: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_backoff: Duration,
}

/// Events surfaced to the session consumer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A channel was (re)established.
    Connected,
    /// The channel dropped; a reconnect is scheduled.
    Disconnected,
    /// Full presence snapshot from the server.
    Presence(Vec<PresenceEntry>),
    /// A message delivered to this identity.
    Delivery(WireMessage),
}

/// Session failures visible to the consumer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task has shut down")]
    Closed,
    #[error("history fetch failed: {0}")]
    HistoryFetch(String),
}

/// Fetches confirmed conversation history, normally via `GET /messages/:id`.
pub trait HistoryFetcher: Send + Sync {
    fn conversation(&self, peer_id: &str) -> BoxFuture<'_, Result<Vec<WireMessage>, String>>;
}

/// One logical channel to the server, reconnecting on every drop.
pub struct ClientSession {
    cmd_tx: mpsc::Sender<SendFrame>,
    event_rx: mpsc::Receiver<SessionEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl ClientSession {
    /// Opens the session. The connection loop runs until the session is
    /// dropped or shut down; a failed or closed connection is retried
    /// indefinitely at the fixed backoff.
    pub fn connect(config: SessionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let task = tokio::spawn(run_session(config, cmd_rx, event_tx));

        ClientSession {
            cmd_tx,
            event_rx,
            task,
        }
    }

    /// Queues a send frame on the channel.
    pub async fn send(&self, frame: SendFrame) -> Result<(), SessionError> {
        self.cmd_tx.send(frame).await.map_err(|_| SessionError::Closed)
    }

    /// Waits for the next session event. `None` after shutdown.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Stops the connection loop.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Connection loop: connect, pump, and on any exit sleep one backoff and
/// try again. Ends only when the consumer goes away.
async fn run_session(
    config: SessionConfig,
    mut cmd_rx: mpsc::Receiver<SendFrame>,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let session = &uuid::Uuid::new_v4().to_string()[..8];

    loop {
        match run_connection(&config, &mut cmd_rx, &event_tx, session).await {
            Ok(()) => debug!("[client-{}] Connection closed", session),
            Err(e) => warn!("[client-{}] Connection failed: {}", session, e),
        }

        if event_tx.send(SessionEvent::Disconnected).await.is_err() {
            return; // consumer gone
        }

        debug!(
            "[client-{}] Reconnecting in {:?}",
            session, config.reconnect_backoff
        );
        tokio::time::sleep(config.reconnect_backoff).await;
    }
}

/// One connection attempt and its pump loop.
async fn run_connection(
    config: &SessionConfig,
    cmd_rx: &mut mpsc::Receiver<SendFrame>,
    event_tx: &mpsc::Sender<SessionEvent>,
    session: &str,
) -> Result<(), String> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| format!("bad URL: {}", e))?;
    let cookie = HeaderValue::from_str(&format!("token={}", config.token))
        .map_err(|e| format!("bad token: {}", e))?;
    request.headers_mut().insert("cookie", cookie);

    let (ws_stream, _) = connect_async(request)
        .await
        .map_err(|e| format!("connect failed: {}", e))?;
    let (mut write, mut read) = ws_stream.split();

    if event_tx.send(SessionEvent::Connected).await.is_err() {
        return Ok(());
    }
    debug!("[client-{}] Connected", session);

    loop {
        tokio::select! {
            ws_msg = read.next() => {
                let msg = match ws_msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(format!("read failed: {}", e)),
                    None => return Ok(()),
                };

                match msg {
                    Message::Text(text) => {
                        match protocol::decode_server_frame(&text) {
                            Ok(ServerFrame::Presence(p)) => {
                                if event_tx.send(SessionEvent::Presence(p.online)).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Ok(ServerFrame::Delivery(msg)) => {
                                if event_tx.send(SessionEvent::Delivery(msg)).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!("[client-{}] Undecodable frame: {}", session, e),
                        }
                    }
                    Message::Ping(payload) => {
                        // Liveness probe; answering it is what keeps the
                        // server from retiring this channel.
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return Err("pong failed".to_string());
                        }
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(frame) = cmd else { return Ok(()) };
                let text = serde_json::to_string(&frame)
                    .map_err(|e| format!("encode failed: {}", e))?;
                write
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| format!("send failed: {}", e))?;
            }
        }
    }
}

/// The local view of one conversation, optimistic entries included.
#[derive(Debug)]
pub struct Conversation {
    own_id: String,
    peer_id: String,
    messages: Vec<WireMessage>,
}

impl Conversation {
    pub fn new(own_id: &str, peer_id: &str) -> Self {
        Conversation {
            own_id: own_id.to_string(),
            peer_id: peer_id.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Appends a provisional copy of an outgoing message and returns it.
    /// The provisional id is replaced by the server-assigned one only when
    /// a history load brings the confirmed record in.
    pub fn record_optimistic(&mut self, text: Option<&str>, has_file: bool) -> WireMessage {
        let provisional = WireMessage {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            sender: self.own_id.clone(),
            recipient: self.peer_id.clone(),
            text: text.map(str::to_string),
            file: has_file.then(|| "pending".to_string()),
            created_at_ms: None,
        };
        self.messages.push(provisional.clone());
        provisional
    }

    /// Applies a live delivery. Only messages from the conversation peer
    /// belong in this view.
    pub fn apply_delivery(&mut self, message: &WireMessage) {
        if message.sender == self.peer_id {
            self.messages.push(message.clone());
        }
    }

    /// Replaces the local view with confirmed server history.
    pub fn replace_history(&mut self, history: Vec<WireMessage>) {
        self.messages = history;
    }

    /// The renderable view: deduplicated by message id, first occurrence
    /// wins, order preserved.
    pub fn messages(&self) -> Vec<&WireMessage> {
        let mut seen = std::collections::HashSet::new();
        self.messages
            .iter()
            .filter(|m| seen.insert(m.id.as_str()))
            .collect()
    }
}

/// A chat client for one active conversation: session + local view +
/// history reconciliation.
pub struct ChatClient {
    session: ClientSession,
    fetcher: Arc<dyn HistoryFetcher>,
    pub conversation: Conversation,
    pub online: Vec<PresenceEntry>,
}

impl ChatClient {
    pub fn new(
        session: ClientSession,
        fetcher: Arc<dyn HistoryFetcher>,
        own_id: &str,
        peer_id: &str,
    ) -> Self {
        ChatClient {
            session,
            fetcher,
            conversation: Conversation::new(own_id, peer_id),
            online: Vec::new(),
        }
    }

    /// Sends a text message. Optimistic append only; no history refetch.
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.conversation.record_optimistic(Some(text), false);
        self.session
            .send(SendFrame {
                recipient: Some(self.conversation.peer_id().to_string()),
                text: Some(text.to_string()),
                file: None,
            })
            .await
    }

    /// Sends a file message, then refetches and replaces the conversation
    /// view with the server-confirmed history.
    pub async fn send_file(&mut self, name: &str, data_url: &str) -> Result<(), SessionError> {
        self.conversation.record_optimistic(None, true);
        self.session
            .send(SendFrame {
                recipient: Some(self.conversation.peer_id().to_string()),
                text: Some(String::new()),
                file: Some(FilePayload {
                    name: name.to_string(),
                    data: data_url.to_string(),
                }),
            })
            .await?;

        let history = self
            .fetcher
            .conversation(self.conversation.peer_id())
            .await
            .map_err(SessionError::HistoryFetch)?;
        self.conversation.replace_history(history);
        Ok(())
    }

    /// Loads the confirmed history for the active conversation.
    pub async fn load_history(&mut self) -> Result<(), SessionError> {
        let history = self
            .fetcher
            .conversation(self.conversation.peer_id())
            .await
            .map_err(SessionError::HistoryFetch)?;
        self.conversation.replace_history(history);
        Ok(())
    }

    /// Waits for the next session event and folds it into the local state
    /// before returning it.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = self.session.next_event().await?;
        match &event {
            SessionEvent::Presence(online) => self.online = online.clone(),
            SessionEvent::Delivery(message) => self.conversation.apply_delivery(message),
            SessionEvent::Connected | SessionEvent::Disconnected => {}
        }
        Some(event)
    }

    /// Stops the underlying session.
    pub fn shutdown(self) {
        self.session.shutdown();
    }
}
