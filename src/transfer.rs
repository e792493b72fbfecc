//! File transfer adapter
//!
//! Moves binary clipboard payloads (images, file lists) over HTTP as a side
//! channel to the WebSocket envelopes, which carry only file references.
//! Uploads are multipart POSTs; downloads stream to a caller-chosen path.
//! Transfers are single-attempt: the sync layer owns retry policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::ConfigStore;

/// File transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local file IO failed
    #[error("File IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP request failed
    #[error("Transfer request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-success status
    #[error("Server rejected the transfer ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// No auth token available
    #[error("Not logged in; cannot transfer files")]
    NotAuthenticated,
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Server-assigned identity of an uploaded file.
///
/// The server is authoritative for the stored name; the receiving side uses
/// it when materializing the download.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub file_url: String,
    pub file_name: String,
}

/// Binary payload transport seam
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Upload a local file, tagged with the originating device
    async fn upload(&self, local_path: &Path, device_id: &str) -> Result<UploadedFile>;

    /// Download a file by id to `save_path`. The write must not leave a
    /// partial file behind on failure.
    async fn download(&self, file_id: &str, save_path: &Path) -> Result<()>;
}

/// HTTP implementation against the relay server's file endpoints
pub struct HttpFileTransfer {
    config: Arc<ConfigStore>,
    client: reqwest::Client,
}

impl HttpFileTransfer {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn token(&self) -> Result<String> {
        self.config
            .get()
            .token
            .ok_or(TransferError::NotAuthenticated)
    }
}

#[async_trait]
impl FileTransfer for HttpFileTransfer {
    async fn upload(&self, local_path: &Path, device_id: &str) -> Result<UploadedFile> {
        let token = self.token()?;
        let cfg = self.config.get();

        let bytes = tokio::fs::read(local_path).await.map_err(|e| TransferError::Io {
            path: local_path.to_path_buf(),
            source: e,
        })?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());

        debug!("Uploading {} ({} bytes)", file_name, bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("device_id", device_id.to_string());

        let response = self
            .client
            .post(format!(
                "{}/api/v1/files/upload",
                cfg.server_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TransferError::Rejected { status, message });
        }

        Ok(response.json::<UploadedFile>().await?)
    }

    async fn download(&self, file_id: &str, save_path: &Path) -> Result<()> {
        let token = self.token()?;
        let cfg = self.config.get();

        let response = self
            .client
            .get(format!(
                "{}/api/v1/files/download/{}",
                cfg.server_url.trim_end_matches('/'),
                file_id
            ))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TransferError::Rejected { status, message });
        }

        let bytes = response.bytes().await?;

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        // Write via a temp file in the same directory so a failed download
        // never leaves a truncated destination.
        let tmp = save_path.with_extension("part");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| TransferError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, save_path)
            .await
            .map_err(|e| TransferError::Io {
                path: save_path.to_path_buf(),
                source: e,
            })?;

        debug!("Downloaded {} to {}", file_id, save_path.display());
        Ok(())
    }
}
