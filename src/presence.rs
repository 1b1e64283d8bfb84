// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Presence Broadcasting
//!
//! Publishes the current online set to every admitted channel whenever
//! membership changes. Every announce carries the complete snapshot — a
//! client that misses one is fully repaired by the next.
//!
//! Announce is invoked after every successful admit and every removal
//! (including liveness-triggered removals), with no other triggers. The
//! broadcaster owns no state of its own.

use std::sync::Arc;

use tracing::{debug, error};

use crate::connection_registry::{ChannelMessage, ConnectionRegistry};
use crate::metrics::ChatMetrics;
use crate::protocol;

/// Broadcasts full presence snapshots over the registry.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
    metrics: ChatMetrics,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: ChatMetrics) -> Self {
        PresenceBroadcaster { registry, metrics }
    }

    /// Snapshots the registry and sends the full online set to every
    /// admitted channel, the just-changed one included.
    pub fn announce(&self) {
        let online = self.registry.snapshot_presence();
        let text = match protocol::encode_presence(&online) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode presence frame: {}", e);
                return;
            }
        };
        let reached = self.registry.broadcast(&ChannelMessage { text });
        self.metrics.presence_broadcasts.inc();
        debug!(
            "presence announce: {} online, {} channels reached",
            online.len(),
            reached
        );
    }
}
