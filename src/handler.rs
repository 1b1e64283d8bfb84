// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Handles one client channel from admission to removal:
//!
//! - resolves the identity from the handshake's `token` cookie (a channel
//!   without a valid credential is refused before admission),
//! - admits the channel into the registry and announces presence,
//! - runs the channel's event loop: inbound chat frames are routed one at a
//!   time (events within a channel never reorder), queued outbound frames
//!   are forwarded, and the liveness monitor is driven from a heartbeat
//!   interval plus an optional probe deadline,
//! - on close, error, or liveness retirement: removes the channel and
//!   announces presence again.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::auth::{self, TokenVerifier};
use crate::connection_registry::ConnectionRegistry;
use crate::liveness::{LivenessAction, LivenessMonitor};
use crate::metrics::ChatMetrics;
use crate::presence::PresenceBroadcaster;
use crate::protocol;
use crate::router::MessageRouter;

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub registry: Arc<ConnectionRegistry>,
    pub router: MessageRouter,
    pub presence: PresenceBroadcaster,
    pub verifier: TokenVerifier,
    pub metrics: ChatMetrics,
    pub heartbeat_interval: Duration,
    pub probe_timeout: Duration,
}

/// Handles a WebSocket connection. `cookie_header` is the raw `Cookie`
/// header captured during the upgrade handshake.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    cookie_header: Option<String>,
    deps: ConnectionDeps,
) {
    // Short random session label for logging; user ids stay out of logs.
    let session = &uuid::Uuid::new_v4().to_string()[..8];

    let (mut write, mut read) = ws_stream.split();

    // Resolve the identity behind the channel. Missing, malformed, or
    // expired credentials refuse the channel; none of them may crash the
    // listener.
    let token = cookie_header
        .as_deref()
        .and_then(auth::token_from_cookie_header);
    let identity = match deps.verifier.resolve(token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("[{}] Channel refused: {}", session, e);
            deps.metrics.connections_refused.inc();
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    };

    // Admission, then the presence announce that includes this channel.
    let (channel_id, mut outbound_rx) = deps.registry.admit(identity.clone());
    deps.metrics.channels_active.inc();
    deps.presence.announce();
    debug!("[{}] Channel admitted", session);

    let mut liveness = LivenessMonitor::new();
    let mut heartbeat = time::interval_at(
        Instant::now() + deps.heartbeat_interval,
        deps.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Armed only while a probe is in flight; cleared on pong.
    let mut probe_deadline: Option<Instant> = None;

    let mut retired = false;

    loop {
        tokio::select! {
            // Inbound frame from the client.
            ws_msg = read.next() => {
                let msg = match ws_msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("[{}] Channel error: {}", session, e);
                        break;
                    }
                    None => {
                        debug!("[{}] Disconnected", session);
                        break;
                    }
                };

                match msg {
                    Message::Text(text) => {
                        handle_chat_frame(session, &identity, &text, &deps).await;
                    }
                    Message::Binary(data) => {
                        // Some clients ship JSON frames as binary.
                        match String::from_utf8(data) {
                            Ok(text) => handle_chat_frame(session, &identity, &text, &deps).await,
                            Err(_) => warn!("[{}] Dropping non-UTF-8 frame", session),
                        }
                    }
                    Message::Pong(_) => {
                        if liveness.on_pong() == LivenessAction::RearmHeartbeat {
                            probe_deadline = None;
                            heartbeat.reset();
                        }
                    }
                    Message::Ping(payload) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        debug!("[{}] Close frame received", session);
                        break;
                    }
                    Message::Frame(_) => {}
                }
            }

            // Outbound frame queued by another handler (delivery) or by a
            // presence announce.
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else { break };
                if write.send(Message::Text(frame.text)).await.is_err() {
                    warn!("[{}] Failed to send outbound frame", session);
                    break;
                }
            }

            // Heartbeat fired: probe the channel.
            _ = heartbeat.tick() => {
                if liveness.on_heartbeat_tick() == LivenessAction::SendProbe {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                    probe_deadline = Some(Instant::now() + deps.probe_timeout);
                }
            }

            // Probe deadline passed without a pong: the channel is dead.
            // The branch is disabled whenever no probe is in flight.
            _ = time::sleep_until(probe_deadline.unwrap_or_else(Instant::now)),
                    if probe_deadline.is_some() => {
                probe_deadline = None;
                if liveness.on_probe_timeout() == LivenessAction::Retire {
                    warn!("[{}] Liveness probe timed out, retiring channel", session);
                    retired = true;
                    break;
                }
            }
        }
    }

    if retired {
        deps.metrics.channels_retired.inc();
        let _ = write.send(Message::Close(None)).await;
    }

    // Same cleanup on every exit path: explicit close, transport error, and
    // liveness retirement all release the channel and re-announce.
    deps.registry.remove(channel_id);
    deps.metrics.channels_active.dec();
    deps.presence.announce();
    debug!("[{}] Channel removed", session);
}

/// Decodes and routes one inbound chat frame. Failures are logged and
/// dropped; the channel stays open either way.
async fn handle_chat_frame(
    session: &str,
    identity: &crate::auth::Identity,
    text: &str,
    deps: &ConnectionDeps,
) {
    let frame = match protocol::decode_send(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("[{}] Undecodable chat frame: {}", session, e);
            deps.metrics.messages_rejected.inc();
            return;
        }
    };

    match deps.router.route(identity, frame).await {
        Ok(stored) => debug!("[{}] Routed message {}", session, stored.id),
        Err(e) => warn!("[{}] Message dropped: {}", session, e),
    }
}
