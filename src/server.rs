// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Accept Loop
//!
//! Accepts TCP connections, upgrades them to WebSocket while capturing the
//! `Cookie` header for identity resolution, and spawns one handler task per
//! channel. Shared by the binary and the integration tests.

use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, warn};

use crate::handler::{self, ConnectionDeps};

/// Runs the accept loop until the listener fails.
pub async fn serve(listener: TcpListener, deps: ConnectionDeps, max_message_size: usize) {
    while let Ok((stream, addr)) = listener.accept().await {
        let deps = deps.clone();

        tokio::spawn(async move {
            let mut cookie_header: Option<String> = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                cookie_header = req
                    .headers()
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            };

            let mut config = WebSocketConfig::default();
            config.max_message_size = Some(max_message_size);

            match accept_hdr_async_with_config(stream, callback, Some(config)).await {
                Ok(ws_stream) => {
                    deps.metrics.connections_total.inc();
                    debug!("New WebSocket connection from {}", addr);
                    handler::handle_connection(ws_stream, cookie_header, deps).await;
                    debug!("WebSocket connection closed for {}", addr);
                }
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    deps.metrics.connections_refused.inc();
                }
            }
        });
    }
}
