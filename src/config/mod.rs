//! Configuration management for ClipRelay
//!
//! Durable sync configuration: device identity, server address, auth token,
//! sync policy. Persists to a TOML file and is shared across application
//! windows through [`ConfigStore`], which broadcasts every change on the
//! process bus so other windows observe it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::state::{BusEvent, SyncBus};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),

    /// Config directory could not be determined
    #[error("Could not find config directory")]
    NoConfigDir,
}

/// Durable sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device ID, generated at first launch and persisted permanently
    #[serde(default = "generate_device_id")]
    pub device_id: String,

    /// Device name; "unknown" until hostname resolution completes
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// HTTP(S) base address of the relay server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Bearer token; present iff logged in
    #[serde(default)]
    pub token: Option<String>,

    /// Whether synchronization is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Delay before each reconnect attempt, in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    /// Heartbeat ping interval, in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Maximum size in bytes for synced binary payloads (0 = unlimited)
    #[serde(default)]
    pub max_sync_size: u64,

    /// Allowed file extensions for `files` sync (empty = allow all)
    #[serde(default)]
    pub allowed_file_extensions: Vec<String>,

    /// Directory where synced images are saved
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Directory where synced files are saved
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,

    /// Path to the SQLite history database
    #[serde(default = "default_history_db")]
    pub history_db: PathBuf,
}

// Default value functions

fn generate_device_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

fn default_device_name() -> String {
    "unknown".to_string()
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cliprelay")
}

fn default_image_dir() -> PathBuf {
    data_dir().join("images")
}

fn default_files_dir() -> PathBuf {
    data_dir().join("files")
}

fn default_history_db() -> PathBuf {
    data_dir().join("history.db")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: generate_device_id(),
            device_name: default_device_name(),
            server_url: default_server_url(),
            token: None,
            enabled: false,
            reconnect_interval_secs: default_reconnect_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_sync_size: 0,
            allowed_file_extensions: Vec::new(),
            image_dir: default_image_dir(),
            files_dir: default_files_dir(),
            history_db: default_history_db(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the default location, creating defaults when
    /// no file exists yet (first launch).
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Ok(path) if path.exists() => Self::load_from_path(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("CLIPRELAY_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|p| p.join("cliprelay").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::Validation(
                "device_id must not be empty".to_string(),
            ));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "server_url must be an http(s) address, got '{}'",
                self.server_url
            )));
        }
        if self.heartbeat_interval_secs == 0 || self.reconnect_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "intervals must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// WebSocket endpoint derived from the HTTP server address
    pub fn ws_url(&self) -> String {
        let base = self
            .server_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/api/v1/ws", base.trim_end_matches('/'))
    }

    /// Whether a bearer token is present
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }
}

/// Process-wide owner of the durable configuration.
///
/// Wraps the config behind a read lock and broadcasts `ConfigChanged` on the
/// bus whenever a mutation is persisted, so every window sees the same
/// configuration without module-level globals.
pub struct ConfigStore {
    config: RwLock<SyncConfig>,
    bus: SyncBus,
}

impl ConfigStore {
    pub fn new(config: SyncConfig, bus: SyncBus) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            bus,
        })
    }

    /// Load from disk and wrap; persists immediately so a first launch pins
    /// the generated device id.
    pub fn load(bus: SyncBus) -> Result<Arc<Self>, ConfigError> {
        let config = SyncConfig::load()?;
        config.save()?;
        Ok(Self::new(config, bus))
    }

    /// Snapshot of the current configuration
    pub fn get(&self) -> SyncConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Mutate, persist, and broadcast the change
    pub fn update<F>(&self, mutate: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let snapshot = {
            let mut config = self.config.write().expect("config lock poisoned");
            mutate(&mut config);
            config.clone()
        };
        snapshot.save()?;
        self.bus.publish(BusEvent::ConfigChanged);
        Ok(())
    }

    pub fn set_token(&self, token: Option<String>) -> Result<(), ConfigError> {
        self.update(|c| c.token = token)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), ConfigError> {
        self.update(|c| c.enabled = enabled)
    }

    pub fn set_server_url(&self, url: String) -> Result<(), ConfigError> {
        self.update(|c| c.server_url = url)
    }

    /// Resolve the device name from the hostname.
    ///
    /// Resolution may require an OS call, so it runs off the async path;
    /// until it completes the persisted placeholder stays in effect and
    /// callers must tolerate a transient "unknown" identity. An empty
    /// hostname is not cached so a later launch can retry.
    pub async fn resolve_device_name(self: &Arc<Self>) {
        if self.get().device_name != default_device_name() {
            return;
        }

        let hostname = tokio::task::spawn_blocking(|| {
            gethostname::gethostname().to_string_lossy().to_string()
        })
        .await
        .unwrap_or_default();

        if hostname.trim().is_empty() {
            warn!("Hostname is empty, keeping placeholder device name");
            return;
        }

        if let Err(e) = self.update(|c| c.device_name = hostname) {
            warn!("Failed to persist resolved device name: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device_id.len(), 8);
        assert_eq!(config.device_name, "unknown");
        assert!(!config.enabled);
        assert!(!config.is_logged_in());
    }

    #[test]
    fn load_from_toml() {
        let toml_str = r#"
            device_id = "abcd1234"
            server_url = "https://relay.example.com"
            enabled = true
            heartbeat_interval_secs = 15
        "#;

        let config = SyncConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.device_id, "abcd1234");
        assert_eq!(config.server_url, "https://relay.example.com");
        assert!(config.enabled);
        assert_eq!(config.heartbeat_interval_secs, 15);
        // Unspecified fields take defaults
        assert_eq!(config.reconnect_interval_secs, 5);
    }

    #[test]
    fn ws_url_rewrites_scheme_and_appends_endpoint() {
        let mut config = SyncConfig::default();
        config.server_url = "http://localhost:8000".into();
        assert_eq!(config.ws_url(), "ws://localhost:8000/api/v1/ws");

        config.server_url = "https://relay.example.com/".into();
        assert_eq!(config.ws_url(), "wss://relay.example.com/api/v1/ws");
    }

    #[test]
    fn rejects_non_http_server_url() {
        let toml_str = r#"server_url = "ftp://nope""#;
        assert!(SyncConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn config_store_broadcasts_changes() {
        let bus = SyncBus::new();
        let mut rx = bus.subscribe();
        let store = ConfigStore::new(SyncConfig::default(), bus);

        // Avoid touching the real config file in tests
        std::env::set_var(
            "CLIPRELAY_CONFIG",
            std::env::temp_dir().join("cliprelay-test-config.toml"),
        );

        store.set_enabled(true).unwrap();
        assert!(store.get().enabled);
        assert!(matches!(rx.try_recv(), Ok(BusEvent::ConfigChanged)));
    }
}
