// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Attachment Storage
//!
//! Writes inbound file payloads to content storage and hands back a stable
//! reference name. Names are a nanosecond Unix timestamp plus the original
//! extension; an existing reference is never overwritten — a collision
//! (accepted as negligible at nanosecond resolution) surfaces as a write
//! error instead.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Attachment persistence failures.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("invalid attachment payload: {0}")]
    InvalidPayload(&'static str),
    #[error("failed to write attachment: {0}")]
    Write(#[from] std::io::Error),
}

/// Filesystem-backed attachment storage under a fixed root directory.
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    /// Opens the store, creating the root directory if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(AttachmentStore {
            root: root.as_ref().to_path_buf(),
        })
    }

    /// Decodes a base64 data-URL payload and writes it once, returning the
    /// generated reference name.
    pub async fn store(
        &self,
        original_name: &str,
        data_url: &str,
    ) -> Result<String, AttachmentError> {
        let bytes = decode_data_url(data_url)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let name = match extension_of(original_name) {
            Some(ext) => format!("{}.{}", nanos, ext),
            None => nanos.to_string(),
        };

        self.write_once(&name, &bytes).await?;
        Ok(name)
    }

    /// Resolves a reference name to its path, rejecting names that could
    /// escape the attachment root.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return None;
        }
        Some(self.root.join(name))
    }

    /// Writes bytes to a fresh file; fails if the reference already exists.
    async fn write_once(&self, name: &str, bytes: &[u8]) -> Result<(), AttachmentError> {
        let path = self.root.join(name);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Pulls the sanitized extension off an original filename.
fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 16 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Decodes a `data:<mime>;base64,<payload>` URL into raw bytes.
fn decode_data_url(data_url: &str) -> Result<Vec<u8>, AttachmentError> {
    let (_, payload) = data_url
        .split_once(',')
        .ok_or(AttachmentError::InvalidPayload("not a data URL"))?;
    STANDARD
        .decode(payload)
        .map_err(|_| AttachmentError::InvalidPayload("bad base64 payload"))
}
