// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Routing
//!
//! Validates, persists, and fans out each inbound chat message:
//!
//! 1. Reject payloads lacking a recipient or any content (the channel
//!    stays open; the frame is logged and dropped).
//! 2. Write the attachment payload, if any, to content storage first; a
//!    failed write aborts the whole message so no record ever points at a
//!    missing file.
//! 3. Persist the message; an unpersisted message is never delivered.
//! 4. Fan the stored message out to every channel of the recipient. The
//!    registry is consulted at fan-out time, not earlier, so a recipient
//!    channel closed mid-route is skipped and one opened mid-route is
//!    reached. Offline recipients are not an error.
//!
//! The sender's own channels are not echoed to; the sending client keeps an
//! optimistic local copy.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::attachment_store::{AttachmentError, AttachmentStore};
use crate::auth::Identity;
use crate::connection_registry::{ChannelMessage, ConnectionRegistry};
use crate::message_store::{MessageStore, NewMessage, StoredMessage, StoreError};
use crate::metrics::ChatMetrics;
use crate::protocol::{self, SendFrame};

/// Message routing failures. All are handled at the channel boundary.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Payload had no recipient, or neither text nor file content.
    #[error("message is missing a recipient or any content")]
    MalformedMessage,
    /// Attachment write failed; the message was discarded whole.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    /// Message persistence failed; the message was not delivered.
    #[error(transparent)]
    Persist(#[from] StoreError),
}

/// Routes inbound chat messages from authenticated channels.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    messages: Arc<dyn MessageStore>,
    attachments: Arc<AttachmentStore>,
    metrics: ChatMetrics,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        messages: Arc<dyn MessageStore>,
        attachments: Arc<AttachmentStore>,
        metrics: ChatMetrics,
    ) -> Self {
        MessageRouter {
            registry,
            messages,
            attachments,
            metrics,
        }
    }

    /// Routes one message from `sender`. Returns the persisted message on
    /// success so callers can observe the assigned id.
    pub async fn route(
        &self,
        sender: &Identity,
        frame: SendFrame,
    ) -> Result<StoredMessage, RouteError> {
        let timer = self.metrics.route_duration.start_timer();
        let result = self.route_inner(sender, frame).await;
        timer.observe_duration();

        match &result {
            Ok(_) => self.metrics.messages_received.inc(),
            Err(_) => self.metrics.messages_rejected.inc(),
        }
        result
    }

    async fn route_inner(
        &self,
        sender: &Identity,
        frame: SendFrame,
    ) -> Result<StoredMessage, RouteError> {
        // Empty text is no content; it rides along with file sends.
        let text = frame.text.filter(|t| !t.is_empty());

        let recipient = frame
            .recipient
            .filter(|r| !r.is_empty())
            .ok_or(RouteError::MalformedMessage)?;
        if text.is_none() && frame.file.is_none() {
            return Err(RouteError::MalformedMessage);
        }

        // Attachment first: a dangling reference must be impossible.
        let attachment = match frame.file {
            Some(file) => {
                let name = self.attachments.store(&file.name, &file.data).await?;
                self.metrics.attachments_stored.inc();
                debug!("attachment stored as {}", name);
                Some(name)
            }
            None => None,
        };

        let stored = self.messages.append(NewMessage {
            sender: sender.id.clone(),
            recipient,
            text,
            attachment,
        })?;

        // Fan out to whatever channels the recipient holds right now. The
        // message is already durable; delivery is best-effort on top.
        match protocol::encode_delivery(&stored) {
            Ok(text) => {
                let delivered = self
                    .registry
                    .send_to_identity(&stored.recipient, &ChannelMessage { text });
                self.metrics.messages_delivered.inc_by(delivered as u64);
                debug!(
                    "message {} routed to {} channel(s) of {}",
                    stored.id, delivered, stored.recipient
                );
            }
            Err(e) => error!("Failed to encode delivery frame: {}", e),
        }

        Ok(stored)
    }
}
