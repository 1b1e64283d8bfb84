// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! The set of currently open, authenticated channels. Each channel is a live
//! WebSocket connection owned by its handler task; the registry holds the
//! identity behind it and an async sender for pushing frames to it (presence
//! snapshots, message deliveries).
//!
//! One identity may hold several channels at once (multi-device). Lookups
//! for fan-out and presence read a consistent snapshot under the lock;
//! mutation is atomic with respect to other registry operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::auth::Identity;

/// Identifies one admitted channel for the registry's lifetime.
pub type ChannelId = u64;

/// A pre-encoded text frame queued for delivery to one channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// The JSON frame to send over the WebSocket.
    pub text: String,
}

struct ChannelEntry {
    identity: Identity,
    sender: mpsc::Sender<ChannelMessage>,
}

/// Thread-safe registry of admitted channels.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        ConnectionRegistry {
            next_id: AtomicU64::new(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Admits a channel under an identity. Returns the channel id and the
    /// receiving end of its outbound queue.
    ///
    /// Admission never displaces another channel: a second connection from
    /// the same identity simply becomes a second channel.
    pub fn admit(&self, identity: Identity) -> (ChannelId, mpsc::Receiver<ChannelMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.write().unwrap();
        channels.insert(
            id,
            ChannelEntry {
                identity,
                sender: tx,
            },
        );
        (id, rx)
    }

    /// Removes a channel. Idempotent: removing a channel that is not
    /// present is a no-op. Returns whether anything was removed.
    pub fn remove(&self, id: ChannelId) -> bool {
        let mut channels = self.channels.write().unwrap();
        channels.remove(&id).is_some()
    }

    /// Queues a frame on every channel belonging to the given identity.
    /// Returns the number of channels the frame was queued on — zero when
    /// the identity is offline, which is not an error.
    pub fn send_to_identity(&self, user_id: &str, msg: &ChannelMessage) -> usize {
        let channels = self.channels.read().unwrap();
        channels
            .values()
            .filter(|entry| entry.identity.id == user_id)
            .filter(|entry| entry.sender.try_send(msg.clone()).is_ok())
            .count()
    }

    /// Queues a frame on every admitted channel.
    pub fn broadcast(&self, msg: &ChannelMessage) -> usize {
        let channels = self.channels.read().unwrap();
        channels
            .values()
            .filter(|entry| entry.sender.try_send(msg.clone()).is_ok())
            .count()
    }

    /// Returns the current online set, deduplicated by identity: an
    /// identity with three open channels appears once.
    pub fn snapshot_presence(&self) -> Vec<Identity> {
        let channels = self.channels.read().unwrap();
        let mut seen: HashMap<&str, &Identity> = HashMap::new();
        for entry in channels.values() {
            seen.entry(entry.identity.id.as_str())
                .or_insert(&entry.identity);
        }
        let mut online: Vec<Identity> = seen.into_values().cloned().collect();
        // Deterministic order for consumers and tests.
        online.sort_by(|a, b| a.id.cmp(&b.id));
        online
    }

    /// Returns the number of currently admitted channels (not identities).
    pub fn channel_count(&self) -> usize {
        let channels = self.channels.read().unwrap();
        channels.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
