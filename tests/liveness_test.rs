// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Liveness Integration Tests
//!
//! Dead-channel detection over real WebSocket connections: a channel that
//! stops answering probes is retired within the heartbeat + probe-timeout
//! bound, and a channel that answers every probe never is.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

mod common;
use common::{expect_presence, next_json, spawn_server_with_heartbeat};

const HEARTBEAT: Duration = Duration::from_millis(300);
const PROBE_TIMEOUT: Duration = Duration::from_millis(150);

#[tokio::test]
async fn test_unresponsive_channel_is_retired_with_one_announce() {
    let server = spawn_server_with_heartbeat(HEARTBEAT, PROBE_TIMEOUT).await;

    let mut alice = server.connect(&server.mint_token("user-a", "alice")).await;
    expect_presence(&mut alice, &["alice"]).await;

    // The zombie completes the handshake and then goes silent: its stream
    // is never polled again, so probes are never answered.
    let zombie = server.connect(&server.mint_token("user-z", "zombie")).await;
    expect_presence(&mut alice, &["alice", "zombie"]).await;
    assert_eq!(server.registry.channel_count(), 2);

    // Alice keeps answering probes (inside next_json) and observes exactly
    // one presence announce for the retirement.
    expect_presence(&mut alice, &["alice"]).await;
    assert_eq!(server.registry.channel_count(), 1);
    assert_eq!(server.metrics.channels_retired.get(), 1);

    // No further presence frame follows.
    let extra = tokio::time::timeout(Duration::from_millis(600), next_json(&mut alice)).await;
    assert!(extra.is_err(), "expected exactly one announce after retirement");

    drop(zombie);
}

#[tokio::test]
async fn test_detection_latency_is_bounded() {
    let server = spawn_server_with_heartbeat(HEARTBEAT, PROBE_TIMEOUT).await;

    let zombie = server.connect(&server.mint_token("user-z", "zombie")).await;
    let connected_at = Instant::now();
    assert_eq!(server.registry.channel_count(), 1);

    // Poll until the registry drops the channel.
    while server.registry.channel_count() > 0 {
        assert!(
            connected_at.elapsed() < 2 * (HEARTBEAT + PROBE_TIMEOUT),
            "channel not retired within twice the detection bound"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Detection can never beat the first heartbeat.
    assert!(connected_at.elapsed() >= HEARTBEAT);

    drop(zombie);
}

#[tokio::test]
async fn test_responsive_channel_never_times_out() {
    let server = spawn_server_with_heartbeat(HEARTBEAT, PROBE_TIMEOUT).await;

    let mut alice = server.connect(&server.mint_token("user-a", "alice")).await;
    expect_presence(&mut alice, &["alice"]).await;

    // Pump for several heartbeat rounds, answering every probe.
    let deadline = Instant::now() + 6 * HEARTBEAT;
    while Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), alice.next()).await {
            Ok(Some(Ok(Message::Ping(payload)))) => {
                alice.send(Message::Pong(payload)).await.unwrap();
            }
            Ok(Some(Ok(_))) | Err(_) => {}
            Ok(Some(Err(e))) => panic!("websocket error: {}", e),
            Ok(None) => panic!("server dropped a live channel"),
        }
    }

    assert_eq!(server.registry.channel_count(), 1);
    assert_eq!(server.metrics.channels_retired.get(), 0);
}
