//! Persistent message channel to the relay server
//!
//! One duplex WebSocket connection per process carries JSON envelopes:
//! outbound `{action, message_id, data}` and inbound
//! `{type, message_id?, source_device_id?, timestamp?, data}`. The channel
//! client owns the connection lifecycle (heartbeat, reconnect) and the
//! request correlator matches request/response pairs over it.

pub mod client;
pub mod correlator;

pub use client::ChannelClient;
pub use correlator::Correlator;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved WebSocket close code signalling an authentication rejection.
/// Suppresses auto-reconnect regardless of the manual flag.
pub const AUTH_REJECTED_CLOSE_CODE: u16 = 1008;

/// How long `send_and_wait` waits for a correlated response
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Channel errors with user-facing messages
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Attempted to send while not connected
    #[error("CR001: Not connected to the sync server.")]
    NotConnected,

    /// No auth token present
    #[error("CR002: Not logged in. Sign in before enabling sync.")]
    NotAuthenticated,

    /// Connection establishment failed
    #[error("CR003: Connection failed: {message}. Check the server address and your network.")]
    Connect { message: String },

    /// Envelope serialization/deserialization error
    #[error("CR004: Data format error: {0}.")]
    Serialization(#[from] serde_json::Error),

    /// No response arrived within the request timeout
    #[error("CR005: The server did not respond in time.")]
    Timeout,

    /// Server answered a request with an error envelope
    #[error("CR006: Server error: {message}")]
    Server { message: String },

    /// The connection was closed while a request was in flight
    #[error("CR007: Disconnected before the server responded.")]
    Disconnected,

    /// Server rejected the credentials (close code 1008)
    #[error("CR008: Authentication rejected by the server. Log in again.")]
    AuthRejected,
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Outbound message actions
pub mod actions {
    pub const SYNC_CLIPBOARD: &str = "sync_clipboard";
    pub const DELETE_CLIPBOARD: &str = "delete_clipboard";
    pub const DELETE_CLIPBOARD_BATCH: &str = "delete_clipboard_batch";
    pub const UPDATE_CLIPBOARD: &str = "update_clipboard";
    pub const FETCH_HISTORY: &str = "fetch_history";
    pub const CLEAR_HISTORY: &str = "clear_history";
    pub const GET_ONLINE_DEVICES: &str = "get_online_devices";
    pub const PING: &str = "ping";
    pub const SYNC_PENDING: &str = "sync_pending";
}

/// Inbound message types
pub mod server_types {
    pub const CLIPBOARD_SYNC: &str = "clipboard_sync";
    pub const CLIPBOARD_DELETED: &str = "clipboard_deleted";
    pub const CLIPBOARD_DELETED_BATCH: &str = "clipboard_deleted_batch";
    pub const CLIPBOARD_UPDATED: &str = "clipboard_updated";
    pub const HISTORY_CLEARED: &str = "history_cleared";
    pub const TIMESTAMP_UPDATED: &str = "timestamp_updated";
    pub const SYNC_CONFIRMED: &str = "sync_confirmed";
    pub const PONG: &str = "pong";
    pub const CONNECTED: &str = "connected";
    pub const ONLINE_DEVICES: &str = "online_devices";
    pub const ERROR: &str = "error";
}

/// Outbound envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    pub data: serde_json::Value,
}

impl ClientEnvelope {
    pub fn new(action: &str, data: serde_json::Value) -> Self {
        Self {
            action: action.to_string(),
            message_id: None,
            data,
        }
    }
}

/// Inbound envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,
}

impl ServerEnvelope {
    /// The human-readable message of an `error` envelope
    pub fn error_message(&self) -> String {
        self.data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string()
    }
}
