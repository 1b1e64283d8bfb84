//! Prometheus Metrics
//!
//! Observability metrics for the chat server.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Chat server metrics.
#[derive(Clone)]
pub struct ChatMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current admitted channels.
    pub channels_active: IntGauge,
    /// Connections refused (handshake failure, missing/invalid credential).
    pub connections_refused: IntCounter,
    /// Channels retired by the liveness monitor.
    pub channels_retired: IntCounter,

    // Message metrics
    /// Inbound chat messages received.
    pub messages_received: IntCounter,
    /// Delivery frames queued to recipient channels.
    pub messages_delivered: IntCounter,
    /// Inbound messages rejected (malformed or persistence failure).
    pub messages_rejected: IntCounter,
    /// Message routing duration in seconds.
    pub route_duration: Histogram,

    // Presence metrics
    /// Presence snapshots broadcast.
    pub presence_broadcasts: IntCounter,

    // Attachment metrics
    /// Attachments written to content storage.
    pub attachments_stored: IntCounter,
}

impl ChatMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::with_opts(Opts::new(
            "chat_connections_total",
            "Total WebSocket connections accepted",
        ))
        .unwrap();

        let channels_active = IntGauge::with_opts(Opts::new(
            "chat_channels_active",
            "Current admitted channels",
        ))
        .unwrap();

        let connections_refused = IntCounter::with_opts(Opts::new(
            "chat_connections_refused_total",
            "Connections refused before admission",
        ))
        .unwrap();

        let channels_retired = IntCounter::with_opts(Opts::new(
            "chat_channels_retired_total",
            "Channels retired by the liveness monitor",
        ))
        .unwrap();

        let messages_received = IntCounter::with_opts(Opts::new(
            "chat_messages_received_total",
            "Inbound chat messages received",
        ))
        .unwrap();

        let messages_delivered = IntCounter::with_opts(Opts::new(
            "chat_messages_delivered_total",
            "Delivery frames queued to recipient channels",
        ))
        .unwrap();

        let messages_rejected = IntCounter::with_opts(Opts::new(
            "chat_messages_rejected_total",
            "Inbound messages rejected",
        ))
        .unwrap();

        let route_duration = Histogram::with_opts(HistogramOpts::new(
            "chat_route_duration_seconds",
            "Message routing duration in seconds",
        ))
        .unwrap();

        let presence_broadcasts = IntCounter::with_opts(Opts::new(
            "chat_presence_broadcasts_total",
            "Presence snapshots broadcast",
        ))
        .unwrap();

        let attachments_stored = IntCounter::with_opts(Opts::new(
            "chat_attachments_stored_total",
            "Attachments written to content storage",
        ))
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry.register(Box::new(channels_active.clone())).unwrap();
        registry
            .register(Box::new(connections_refused.clone()))
            .unwrap();
        registry
            .register(Box::new(channels_retired.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_received.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_delivered.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_rejected.clone()))
            .unwrap();
        registry.register(Box::new(route_duration.clone())).unwrap();
        registry
            .register(Box::new(presence_broadcasts.clone()))
            .unwrap();
        registry
            .register(Box::new(attachments_stored.clone()))
            .unwrap();

        ChatMetrics {
            registry: Arc::new(registry),
            connections_total,
            channels_active,
            connections_refused,
            channels_retired,
            messages_received,
            messages_delivered,
            messages_rejected,
            route_duration,
            presence_broadcasts,
            attachments_stored,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for ChatMetrics {
    fn default() -> Self {
        Self::new()
    }
}
