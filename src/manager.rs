//! Sync transport over the message channel
//!
//! [`SyncManager`] turns the raw envelope channel into typed operations:
//! outbound clipboard mutations become correlated requests, and inbound push
//! envelopes become [`RemoteEvent`]s on an mpsc queue the sync engine drains.
//! The trait seam lets engine tests substitute a recording transport.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::channel::{actions, server_types, ChannelClient, ClientEnvelope, Result, ServerEnvelope};
use crate::state::{OnlineDevice, SyncShared};
use crate::store::{ClipboardItem, RecordPatch};

/// A remote mutation pushed by another device
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    Sync(ClipboardItem),
    Deleted(String),
    DeletedBatch(Vec<String>),
    Updated(String, RecordPatch),
    HistoryCleared,
    TimestampUpdated { id: String, create_time: String },
}

/// Typed sync operations the engine performs against the server
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Upload one item; resolves once the server confirms it
    async fn sync_clipboard(&self, item: &ClipboardItem) -> Result<()>;

    /// Push a partial update of an existing record
    async fn update_clipboard(&self, id: &str, patch: &RecordPatch) -> Result<()>;

    async fn delete_clipboard(&self, id: &str) -> Result<()>;

    async fn delete_clipboard_batch(&self, ids: &[String]) -> Result<()>;

    /// Server-side history page, newest first
    async fn fetch_history(&self, limit: u32) -> Result<Vec<ClipboardItem>>;

    async fn clear_history(&self) -> Result<()>;

    /// Ask the server to re-push records still queued for this device
    async fn sync_pending(&self) -> Result<()>;

    async fn get_online_devices(&self) -> Result<Vec<OnlineDevice>>;

    fn is_connected(&self) -> bool;
}

/// Channel-backed [`SyncTransport`] plus the push-event pump
pub struct SyncManager {
    client: ChannelClient,
    shared: Arc<SyncShared>,
}

impl SyncManager {
    /// Wire push handlers and return the manager together with the event
    /// queue the engine consumes. Handlers stay registered for the life of
    /// the client; a replaced manager's queue simply goes quiet.
    pub fn new(
        client: ChannelClient,
        shared: Arc<SyncShared>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        Self::register_push_handlers(&client, &shared, tx);

        (Arc::new(Self { client, shared }), rx)
    }

    fn register_push_handlers(
        client: &ChannelClient,
        shared: &Arc<SyncShared>,
        tx: mpsc::UnboundedSender<RemoteEvent>,
    ) {
        let forward = {
            let shared = shared.clone();
            move |event: RemoteEvent| {
                shared.set_last_sync_now();
                let _ = tx.send(event);
            }
        };

        let f = forward.clone();
        client.on(
            server_types::CLIPBOARD_SYNC,
            Arc::new(move |env| match parse_item(&env) {
                Some(item) => f(RemoteEvent::Sync(item)),
                None => warn!("clipboard_sync push with unparseable item, dropping"),
            }),
        );

        let f = forward.clone();
        client.on(
            server_types::CLIPBOARD_DELETED,
            Arc::new(move |env| match str_field(&env, "id") {
                Some(id) => f(RemoteEvent::Deleted(id)),
                None => warn!("clipboard_deleted push without id, dropping"),
            }),
        );

        let f = forward.clone();
        client.on(
            server_types::CLIPBOARD_DELETED_BATCH,
            Arc::new(move |env| {
                let ids: Vec<String> = env
                    .data
                    .get("ids")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                if ids.is_empty() {
                    warn!("clipboard_deleted_batch push without ids, dropping");
                } else {
                    f(RemoteEvent::DeletedBatch(ids));
                }
            }),
        );

        let f = forward.clone();
        client.on(
            server_types::CLIPBOARD_UPDATED,
            Arc::new(move |env| {
                let id = str_field(&env, "id");
                let patch: Option<RecordPatch> = env
                    .data
                    .get("updates")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                match (id, patch) {
                    (Some(id), Some(patch)) => f(RemoteEvent::Updated(id, patch)),
                    _ => warn!("clipboard_updated push missing id or updates, dropping"),
                }
            }),
        );

        let f = forward.clone();
        client.on(
            server_types::HISTORY_CLEARED,
            Arc::new(move |_env| f(RemoteEvent::HistoryCleared)),
        );

        let f = forward;
        client.on(
            server_types::TIMESTAMP_UPDATED,
            Arc::new(move |env| {
                // Payload nests under clipboard_item
                let inner = env.data.get("clipboard_item").unwrap_or(&env.data);
                let id = inner.get("id").and_then(|v| v.as_str());
                let create_time = inner.get("createTime").and_then(|v| v.as_str());
                match (id, create_time) {
                    (Some(id), Some(create_time)) => f(RemoteEvent::TimestampUpdated {
                        id: id.to_string(),
                        create_time: create_time.to_string(),
                    }),
                    _ => warn!("timestamp_updated push missing fields, dropping"),
                }
            }),
        );
    }

    pub async fn connect(&self) -> Result<()> {
        self.client.connect().await
    }

    pub fn disconnect(&self, manual: bool) {
        self.client.disconnect(manual);
    }

    async fn request(&self, action: &str, data: serde_json::Value) -> Result<ServerEnvelope> {
        self.client
            .send_and_wait(ClientEnvelope::new(action, data))
            .await
    }
}

#[async_trait]
impl SyncTransport for SyncManager {
    async fn sync_clipboard(&self, item: &ClipboardItem) -> Result<()> {
        self.request(
            actions::SYNC_CLIPBOARD,
            serde_json::json!({ "clipboard_item": item }),
        )
        .await?;
        Ok(())
    }

    async fn update_clipboard(&self, id: &str, patch: &RecordPatch) -> Result<()> {
        self.request(
            actions::UPDATE_CLIPBOARD,
            serde_json::json!({ "id": id, "updates": patch }),
        )
        .await?;
        Ok(())
    }

    async fn delete_clipboard(&self, id: &str) -> Result<()> {
        self.request(actions::DELETE_CLIPBOARD, serde_json::json!({ "id": id }))
            .await?;
        Ok(())
    }

    async fn delete_clipboard_batch(&self, ids: &[String]) -> Result<()> {
        self.request(
            actions::DELETE_CLIPBOARD_BATCH,
            serde_json::json!({ "ids": ids }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_history(&self, limit: u32) -> Result<Vec<ClipboardItem>> {
        let response = self
            .request(
                actions::FETCH_HISTORY,
                serde_json::json!({ "limit": limit, "offset": 0 }),
            )
            .await?;

        Ok(response
            .data
            .get("items")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    async fn clear_history(&self) -> Result<()> {
        self.request(actions::CLEAR_HISTORY, serde_json::json!({ "confirm": true }))
            .await?;
        Ok(())
    }

    async fn sync_pending(&self) -> Result<()> {
        self.request(actions::SYNC_PENDING, serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn get_online_devices(&self) -> Result<Vec<OnlineDevice>> {
        let response = self
            .request(actions::GET_ONLINE_DEVICES, serde_json::json!({}))
            .await?;

        let devices: Vec<OnlineDevice> = response
            .data
            .get("devices")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        self.shared.set_online_devices(devices.clone());
        Ok(devices)
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

fn parse_item(env: &ServerEnvelope) -> Option<ClipboardItem> {
    // Servers wrap the item; accept the bare shape too
    let value = env.data.get("clipboard_item").unwrap_or(&env.data);
    serde_json::from_value(value.clone()).ok()
}

fn str_field(env: &ServerEnvelope, key: &str) -> Option<String> {
    env.data.get(key)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, SyncConfig};
    use crate::state::SyncBus;
    use crate::store::{ClipboardRecord, ContentKind};

    fn manager() -> (Arc<SyncManager>, mpsc::UnboundedReceiver<RemoteEvent>, ChannelClient) {
        let bus = SyncBus::new();
        let config = ConfigStore::new(SyncConfig::default(), bus.clone());
        let shared = SyncShared::new(bus);
        let client = ChannelClient::new(config, shared.clone());
        let (manager, rx) = SyncManager::new(client.clone(), shared);
        (manager, rx, client)
    }

    fn push(kind: &str, data: serde_json::Value) -> ServerEnvelope {
        ServerEnvelope {
            kind: kind.into(),
            message_id: None,
            source_device_id: Some("dev-b".into()),
            timestamp: None,
            data,
        }
    }

    #[tokio::test]
    async fn sync_push_becomes_remote_event() {
        let (_manager, mut rx, client) = manager();

        let record = ClipboardRecord {
            id: "r1".into(),
            kind: ContentKind::Text,
            subtype: None,
            value: "hi".into(),
            count: 2,
            favorite: false,
            create_time: "2026-08-23T10:00:00Z".into(),
            note: None,
            device_id: Some("dev-b".into()),
            device_name: None,
            content_hash: None,
            synced: true,
        };
        let item = ClipboardItem::from_record(record);

        client.dispatch(push(
            server_types::CLIPBOARD_SYNC,
            serde_json::json!({ "clipboard_item": item }),
        ));

        match rx.try_recv() {
            Ok(RemoteEvent::Sync(received)) => assert_eq!(received.record.id, "r1"),
            other => panic!("expected Sync event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_and_update_pushes_become_events() {
        let (_manager, mut rx, client) = manager();

        client.dispatch(push(
            server_types::CLIPBOARD_DELETED,
            serde_json::json!({ "id": "r1" }),
        ));
        client.dispatch(push(
            server_types::CLIPBOARD_UPDATED,
            serde_json::json!({ "id": "r2", "updates": { "favorite": true } }),
        ));
        client.dispatch(push(server_types::HISTORY_CLEARED, serde_json::json!({})));

        assert!(matches!(rx.try_recv(), Ok(RemoteEvent::Deleted(id)) if id == "r1"));
        match rx.try_recv() {
            Ok(RemoteEvent::Updated(id, patch)) => {
                assert_eq!(id, "r2");
                assert_eq!(patch.favorite, Some(true));
            }
            other => panic!("expected Updated event, got {other:?}"),
        }
        assert!(matches!(rx.try_recv(), Ok(RemoteEvent::HistoryCleared)));
    }

    #[tokio::test]
    async fn timestamp_update_parses_nested_payload() {
        let (_manager, mut rx, client) = manager();

        client.dispatch(push(
            server_types::TIMESTAMP_UPDATED,
            serde_json::json!({
                "clipboard_item": { "id": "r1", "createTime": "2026-08-23T12:00:00Z" }
            }),
        ));

        match rx.try_recv() {
            Ok(RemoteEvent::TimestampUpdated { id, create_time }) => {
                assert_eq!(id, "r1");
                assert_eq!(create_time, "2026-08-23T12:00:00Z");
            }
            other => panic!("expected TimestampUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_pushes_are_dropped() {
        let (_manager, mut rx, client) = manager();

        client.dispatch(push(
            server_types::CLIPBOARD_DELETED,
            serde_json::json!({ "wrong": "shape" }),
        ));
        client.dispatch(push(
            server_types::CLIPBOARD_DELETED_BATCH,
            serde_json::json!({ "ids": [] }),
        ));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn parse_item_accepts_bare_and_wrapped_shapes() {
        let record = serde_json::json!({
            "id": "r1", "type": "text", "value": "x", "count": 1,
            "createTime": "2026-08-23T10:00:00Z", "synced": 1
        });

        let wrapped = push(
            server_types::CLIPBOARD_SYNC,
            serde_json::json!({ "clipboard_item": record }),
        );
        assert!(parse_item(&wrapped).is_some());

        let bare = push(server_types::CLIPBOARD_SYNC, record);
        assert!(parse_item(&bare).is_some());
    }
}
