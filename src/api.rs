//! HTTP API client for the relay server
//!
//! Covers the request/response endpoints that do not ride the WebSocket:
//! authentication, the paginated catch-up feed, and the per-device sync
//! watermark.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ConfigStore;
use crate::store::ClipboardItem;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-success status
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// No auth token available
    #[error("Not logged in")]
    NotAuthenticated,
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[allow(dead_code)]
    pub token_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// One page of the catch-up feed
#[derive(Debug, Deserialize)]
pub struct SyncUpdates {
    pub total: u64,
    pub items: Vec<ClipboardItem>,
}

/// Catch-up feed and watermark endpoints, as a seam for the sync engine
#[async_trait]
pub trait SyncFeed: Send + Sync {
    /// Fetch one page of records other devices uploaded since this device's
    /// watermark. Ordered by `createTime` ascending.
    async fn fetch_sync_updates(
        &self,
        device_id: &str,
        limit: u32,
        offset: u64,
    ) -> Result<SyncUpdates>;

    /// Advance this device's server-side sync watermark
    async fn update_sync_time(&self, device_id: &str, sync_time: &str) -> Result<()>;
}

/// Stateless HTTP client; reads the server address and token per call so
/// config changes take effect without rebuilding it.
pub struct ApiClient {
    config: Arc<ConfigStore>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .get()
            .server_url
            .trim_end_matches('/')
            .to_string()
    }

    fn token(&self) -> Result<String> {
        self.config.get().token.ok_or(ApiError::NotAuthenticated)
    }

    async fn check<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Server { status, message });
        }
        Ok(response.json::<T>().await?)
    }

    /// Exchange credentials for a bearer token (OAuth2 password form)
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/v1/auth/login", self.base_url()))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let token: TokenResponse = Self::check(response).await?;
        Ok(token.access_token)
    }

    /// Create an account
    pub async fn register(&self, username: &str, password: &str) -> Result<UserInfo> {
        let response = self
            .client
            .post(format!("{}/api/v1/auth/register", self.base_url()))
            .json(&serde_json::json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await?;

        Self::check(response).await
    }

    /// Who the current token belongs to; doubles as a token validity probe
    pub async fn current_user(&self) -> Result<UserInfo> {
        let response = self
            .client
            .get(format!("{}/api/v1/auth/me", self.base_url()))
            .bearer_auth(self.token()?)
            .send()
            .await?;

        Self::check(response).await
    }
}

#[async_trait]
impl SyncFeed for ApiClient {
    async fn fetch_sync_updates(
        &self,
        device_id: &str,
        limit: u32,
        offset: u64,
    ) -> Result<SyncUpdates> {
        let response = self
            .client
            .get(format!("{}/api/v1/clipboard/sync/updates", self.base_url()))
            .bearer_auth(self.token()?)
            .query(&[
                ("device_id", device_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;

        Self::check(response).await
    }

    async fn update_sync_time(&self, device_id: &str, sync_time: &str) -> Result<()> {
        let response = self
            .client
            .post(format!(
                "{}/api/v1/clipboard/sync/update_sync_time",
                self.base_url()
            ))
            .bearer_auth(self.token()?)
            .json(&serde_json::json!({
                "device_id": device_id,
                "sync_time": sync_time,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Server { status, message });
        }
        Ok(())
    }
}
