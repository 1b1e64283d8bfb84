// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Wire Protocol
//!
//! JSON frames exchanged over the duplex channel. Two server → client frame
//! shapes (full presence snapshots and message deliveries) and one
//! client → server shape (send). Liveness probes are WebSocket ping/pong
//! control frames and never appear here.
//!
//! Field spellings (`recepient`, `_id`, `userId`) are the historic wire
//! names; existing clients depend on them.

use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::message_store::StoredMessage;

/// One entry of a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub username: String,
}

impl From<&Identity> for PresenceEntry {
    fn from(identity: &Identity) -> Self {
        PresenceEntry {
            user_id: identity.id.clone(),
            username: identity.username.clone(),
        }
    }
}

/// Server → client: the complete online set. Always a full replacement,
/// never a delta, so a missed frame is repaired by the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceFrame {
    pub online: Vec<PresenceEntry>,
}

/// A file payload riding inside a send frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    /// Original filename; only the extension survives into storage.
    pub name: String,
    /// base64 data URL (`data:<mime>;base64,<payload>`).
    pub data: String,
}

/// Client → server: send a message to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendFrame {
    #[serde(rename = "recepient", default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file: Option<FilePayload>,
}

/// A chat message as it appears on the wire: in delivery frames and in
/// history responses. Deliveries omit `createdAt`; history includes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: String,
    #[serde(rename = "recepient")]
    pub recipient: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<u64>,
}

impl WireMessage {
    /// Delivery-frame view of a stored message (no timestamp, matching the
    /// live-delivery shape).
    pub fn delivery(message: &StoredMessage) -> Self {
        WireMessage {
            id: message.id.clone(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            text: message.text.clone(),
            file: message.attachment.clone(),
            created_at_ms: None,
        }
    }

    /// History view of a stored message, timestamp included.
    pub fn history(message: &StoredMessage) -> Self {
        WireMessage {
            created_at_ms: Some(message.created_at_ms),
            ..Self::delivery(message)
        }
    }
}

/// Any frame a client can receive.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Presence(PresenceFrame),
    Delivery(WireMessage),
}

/// Decodes an inbound client frame.
pub fn decode_send(text: &str) -> Result<SendFrame, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// Decodes a server frame on the client side.
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// Encodes a presence frame for the given snapshot.
pub fn encode_presence(online: &[Identity]) -> Result<String, String> {
    let frame = PresenceFrame {
        online: online.iter().map(PresenceEntry::from).collect(),
    };
    serde_json::to_string(&frame).map_err(|e| e.to_string())
}

/// Encodes a delivery frame for a stored message.
pub fn encode_delivery(message: &StoredMessage) -> Result<String, String> {
    serde_json::to_string(&WireMessage::delivery(message)).map_err(|e| e.to_string())
}
