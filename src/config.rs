//! Chat Server Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::message_store::StorageBackend;

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// Address the HTTP API binds to.
    pub http_addr: SocketAddr,
    /// Heartbeat interval in seconds (how often idle channels are probed).
    pub heartbeat_secs: u64,
    /// Probe timeout in seconds (how long a probed channel has to answer).
    /// Must be shorter than the heartbeat interval.
    pub probe_timeout_secs: u64,
    /// Maximum inbound frame size in bytes (attachments ride base64-encoded
    /// inside chat frames, so this is generous by default).
    pub max_message_size: usize,
    /// Storage backend (memory or sqlite).
    pub storage_backend: StorageBackend,
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,
    /// Directory attachment payloads are written to.
    pub attachment_dir: PathBuf,
    /// Shared secret the credential tokens are signed with.
    pub auth_secret: String,
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        ChatConfig {
            listen_addr: "0.0.0.0:4000".parse().unwrap(),
            http_addr: "127.0.0.1:4001".parse().unwrap(),
            heartbeat_secs: 5,
            probe_timeout_secs: 1,
            max_message_size: 16 * 1024 * 1024, // 16 MiB
            storage_backend: StorageBackend::Sqlite,
            attachment_dir: data_dir.join("attachments"),
            data_dir,
            auth_secret: String::new(),
            token_ttl_secs: 30 * 24 * 60 * 60, // 30 days
        }
    }
}

impl ChatConfig {
    /// Loads configuration from environment variables.
    ///
    /// If `PARLEY_AUTH_SECRET` is unset, an ephemeral random secret is
    /// generated; issued tokens then stop verifying after a restart.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PARLEY_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(addr) = std::env::var("PARLEY_HTTP_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.http_addr = parsed;
            }
        }

        if let Ok(val) = std::env::var("PARLEY_HEARTBEAT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.heartbeat_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("PARLEY_PROBE_TIMEOUT_SECS") {
            if let Ok(parsed) = val.parse() {
                config.probe_timeout_secs = parsed;
            }
        }

        if let Ok(val) = std::env::var("PARLEY_MAX_MESSAGE_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.max_message_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("PARLEY_STORAGE_BACKEND") {
            config.storage_backend = match val.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                _ => StorageBackend::Sqlite,
            };
        }

        if let Ok(val) = std::env::var("PARLEY_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
            config.attachment_dir = config.data_dir.join("attachments");
        }

        if let Ok(val) = std::env::var("PARLEY_ATTACHMENT_DIR") {
            config.attachment_dir = PathBuf::from(val);
        }

        match std::env::var("PARLEY_AUTH_SECRET") {
            Ok(secret) if !secret.is_empty() => config.auth_secret = secret,
            _ => {
                config.auth_secret =
                    format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
                tracing::warn!(
                    "PARLEY_AUTH_SECRET not set; using an ephemeral secret \
                     (tokens will not survive a restart)"
                );
            }
        }

        if let Ok(val) = std::env::var("PARLEY_TOKEN_TTL_SECS") {
            if let Ok(parsed) = val.parse() {
                config.token_ttl_secs = parsed;
            }
        }

        config
    }

    /// Returns the heartbeat interval as a Duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Returns the probe timeout as a Duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Returns the token lifetime as a Duration.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}
