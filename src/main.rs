// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Parley Chat Server
//!
//! A real-time one-to-one chat server. Provides:
//! - WebSocket endpoint for presence and message delivery
//! - HTTP endpoints for registration/login, history, attachments, and
//!   health/metrics
//! - Per-channel liveness detection with heartbeat probes

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use parley::attachment_store::AttachmentStore;
use parley::auth::TokenVerifier;
use parley::config::ChatConfig;
use parley::connection_registry::ConnectionRegistry;
use parley::handler::ConnectionDeps;
use parley::http::{create_router, HttpState};
use parley::message_store::{create_message_store, MessageStore};
use parley::metrics::ChatMetrics;
use parley::presence::PresenceBroadcaster;
use parley::router::MessageRouter;
use parley::server;
use parley::user_store::{create_user_store, UserStore};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parley=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = ChatConfig::from_env();

    info!("Starting Parley Chat Server v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("HTTP API: {}", config.http_addr);
    info!("Storage backend: {:?}", config.storage_backend);
    info!(
        "Heartbeat: {}s interval, {}s probe timeout",
        config.heartbeat_secs, config.probe_timeout_secs
    );

    // Initialize metrics
    let metrics = ChatMetrics::new();

    // Initialize shared state
    let messages: Arc<dyn MessageStore> = Arc::from(create_message_store(
        config.storage_backend,
        Some(&config.data_dir),
    ));
    let users: Arc<dyn UserStore> = Arc::from(create_user_store(
        config.storage_backend,
        Some(&config.data_dir),
    ));
    let attachments = Arc::new(
        AttachmentStore::open(&config.attachment_dir).expect("Failed to open attachment storage"),
    );

    let verifier = TokenVerifier::new(&config.auth_secret, config.token_ttl());
    let registry = Arc::new(ConnectionRegistry::new());
    let presence = PresenceBroadcaster::new(registry.clone(), metrics.clone());
    let router = MessageRouter::new(
        registry.clone(),
        messages.clone(),
        attachments.clone(),
        metrics.clone(),
    );

    // Optional bearer token protecting the metrics endpoint
    let metrics_token = std::env::var("PARLEY_METRICS_TOKEN").ok();
    if metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    }

    // Start HTTP server for the REST surface
    let http_state = HttpState {
        users,
        messages,
        attachments,
        verifier: verifier.clone(),
        metrics: metrics.clone(),
        metrics_token,
    };
    let http_router = create_router(http_state);

    let http_addr = config.http_addr;
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind HTTP listener");

    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        axum::serve(http_listener, http_router).await.unwrap();
    });

    // Start TCP listener for WebSocket
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");

    info!("WebSocket server listening on {}", config.listen_addr);

    let deps = ConnectionDeps {
        registry,
        router,
        presence,
        verifier,
        metrics,
        heartbeat_interval: config.heartbeat_interval(),
        probe_timeout: config.probe_timeout(),
    };

    server::serve(listener, deps, config.max_message_size).await;
}
