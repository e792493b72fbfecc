//! # ClipRelay
//!
//! Multi-device clipboard synchronization client.
//!
//! ClipRelay mirrors clipboard entries (text, HTML, RTF, images, file lists)
//! captured on one device to a relay server and applies entries pushed from
//! other logged-in devices, with offline queuing and reconciliation on
//! reconnect.

pub mod api;
pub mod channel;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod engine;
pub mod hash;
pub mod manager;
pub mod state;
pub mod store;
pub mod transfer;

pub use config::{ConfigStore, SyncConfig};
pub use engine::SyncEngine;
pub use manager::SyncManager;
pub use state::{SyncShared, SyncStatus};
pub use store::{ClipboardItem, ClipboardRecord, ContentKind};

/// Result type alias for ClipRelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipRelay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Local store error
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(#[from] channel::ChannelError),

    /// File transfer error
    #[error("Transfer error: {0}")]
    Transfer(#[from] transfer::TransferError),

    /// HTTP API error
    #[error("API error: {0}")]
    Api(#[from] api::ApiError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Page size for server-side catch-up pulls
pub const SYNC_PAGE_SIZE: u32 = 50;
