//! WebSocket channel client
//!
//! Owns the single connection to the relay server: connect/disconnect,
//! heartbeat pings, correlated request/response, push-handler dispatch and
//! fixed-interval auto-reconnect. Reads and writes run on separate spawned
//! tasks over a split stream; senders talk to the writer task through an
//! unbounded mpsc channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::config::ConfigStore;
use crate::state::{OnlineDevice, SyncShared, SyncStatus};

use super::{
    actions, server_types, ChannelError, ClientEnvelope, Correlator, Result, ServerEnvelope,
    AUTH_REJECTED_CLOSE_CODE, REQUEST_TIMEOUT,
};

/// Callback invoked for an inbound push type
pub type MessageHandler = Arc<dyn Fn(ServerEnvelope) + Send + Sync>;

struct Inner {
    config: Arc<ConfigStore>,
    shared: Arc<SyncShared>,
    correlator: Correlator,
    handlers: RwLock<HashMap<String, MessageHandler>>,
    /// Writer-task inlet; present iff a connection is up
    outbound: RwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    /// Set by an explicit disconnect; suppresses auto-reconnect
    manual_close: AtomicBool,
    /// Set on close code 1008; suppresses auto-reconnect until reset
    auth_rejected: AtomicBool,
    /// Bumped on every connect/disconnect so stale connection tasks
    /// (reader, heartbeat, reconnect loop) can tell they lost the race
    generation: AtomicU64,
    /// Single-flight guard for the reconnect loop
    reconnecting: AtomicBool,
}

/// Handle to the channel connection. Cheap to clone.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<Inner>,
}

impl ChannelClient {
    pub fn new(config: Arc<ConfigStore>, shared: Arc<SyncShared>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                shared,
                correlator: Correlator::new(),
                handlers: RwLock::new(HashMap::new()),
                outbound: RwLock::new(None),
                manual_close: AtomicBool::new(false),
                auth_rejected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    /// Register the handler for an inbound push type. Last write wins.
    pub fn on(&self, kind: &str, handler: MessageHandler) {
        self.inner
            .handlers
            .write()
            .expect("handlers lock poisoned")
            .insert(kind.to_string(), handler);
    }

    /// Remove a push handler
    pub fn off(&self, kind: &str) {
        self.inner
            .handlers
            .write()
            .expect("handlers lock poisoned")
            .remove(kind);
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .outbound
            .read()
            .expect("outbound lock poisoned")
            .is_some()
            && self.inner.shared.status() == SyncStatus::Connected
    }

    /// Open the connection. Idempotent while connected; fails fast without
    /// a token so nothing touches the network unauthenticated.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let cfg = self.inner.config.get();
        let Some(token) = cfg.token.clone() else {
            return Err(ChannelError::NotAuthenticated);
        };

        self.inner.manual_close.store(false, Ordering::SeqCst);
        self.inner.auth_rejected.store(false, Ordering::SeqCst);
        self.inner.shared.set_status(SyncStatus::Connecting);

        let mut url = url::Url::parse(&cfg.ws_url()).map_err(|e| ChannelError::Connect {
            message: format!("invalid server address: {e}"),
        })?;
        url.query_pairs_mut()
            .append_pair("token", &token)
            .append_pair("device_id", &cfg.device_id)
            .append_pair("device_name", &cfg.device_name);

        info!("Connecting to {}", cfg.ws_url());

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            let message = e.to_string();
            self.inner.shared.set_error(format!("Connection failed: {message}"));
            ChannelError::Connect { message }
        })?;

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<WsMessage>();

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.outbound.write().expect("outbound lock poisoned") = Some(send_tx);

        // Writer task: drains the outbound queue into the sink. Dropping
        // the sender ends the loop and closes the socket.
        tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = ws_sink.send(msg).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sink.close().await;
            debug!("Writer task ended");
        });

        // Reader task: dispatches inbound envelopes until the stream ends,
        // then runs the close path for its generation.
        let client = self.clone();
        tokio::spawn(async move {
            let mut auth_rejected = false;

            while let Some(ws_msg) = ws_source.next().await {
                match ws_msg {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<ServerEnvelope>(text.as_str()) {
                            Ok(envelope) => client.dispatch(envelope),
                            Err(e) => warn!("Failed to deserialize message: {}", e),
                        }
                    }
                    Ok(WsMessage::Binary(data)) => {
                        warn!("Received unexpected binary message of {} bytes", data.len());
                    }
                    Ok(WsMessage::Close(frame)) => {
                        if let Some(frame) = frame {
                            let code = u16::from(frame.code);
                            info!("Connection closed by server (code {})", code);
                            if code == AUTH_REJECTED_CLOSE_CODE {
                                auth_rejected = true;
                            }
                        } else {
                            info!("Connection closed by server");
                        }
                        break;
                    }
                    Ok(WsMessage::Ping(_)) => {
                        // Pong is handled automatically by tokio-tungstenite
                    }
                    Ok(WsMessage::Pong(_)) => {
                        debug!("Received transport pong");
                    }
                    Ok(WsMessage::Frame(_)) => {
                        warn!("Received unexpected raw frame");
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            client.on_transport_closed(generation, auth_rejected);
        });

        // Heartbeat task: periodic application-level ping. Ends when the
        // connection it belongs to is gone.
        let heartbeat = self.clone();
        let interval = Duration::from_secs(cfg.heartbeat_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if heartbeat.inner.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                let ping = ClientEnvelope::new(
                    actions::PING,
                    serde_json::json!({ "timestamp": chrono::Utc::now().timestamp() }),
                );
                if heartbeat.send(ping).is_err() {
                    break;
                }
                debug!("Heartbeat ping sent");
            }
        });

        self.inner.shared.set_status(SyncStatus::Connected);
        info!("Connected to sync server");
        Ok(())
    }

    /// Close the connection.
    ///
    /// `manual` marks a user-initiated disconnect, which stays down until
    /// the next explicit connect. A non-manual disconnect follows the same
    /// teardown but leaves auto-reconnect eligible.
    pub fn disconnect(&self, manual: bool) {
        self.inner.manual_close.store(manual, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let sender = self
            .inner
            .outbound
            .write()
            .expect("outbound lock poisoned")
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(WsMessage::Close(None));
        }

        // Every in-flight request fails now rather than timing out later
        self.inner.correlator.fail_all();
        self.inner.shared.set_status(SyncStatus::Disconnected);

        if !manual && self.should_auto_reconnect() {
            self.spawn_reconnect_loop();
        }
    }

    /// Fire-and-forget send
    pub fn send(&self, envelope: ClientEnvelope) -> Result<()> {
        let guard = self.inner.outbound.read().expect("outbound lock poisoned");
        let tx = guard.as_ref().ok_or(ChannelError::NotConnected)?;
        let text = serde_json::to_string(&envelope)?;
        tx.send(WsMessage::Text(text.into()))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Send a request and wait for the correlated response.
    ///
    /// An `error`-typed response rejects with the server's message; no
    /// response within [`REQUEST_TIMEOUT`] rejects with a timeout and the
    /// registration is evicted so a late echo is dropped.
    pub async fn send_and_wait(&self, mut envelope: ClientEnvelope) -> Result<ServerEnvelope> {
        let message_id = uuid::Uuid::new_v4().simple().to_string();
        envelope.message_id = Some(message_id.clone());

        let rx = self.inner.correlator.register(&message_id);
        if let Err(e) = self.send(envelope) {
            self.inner.correlator.evict(&message_id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Err(_) => {
                self.inner.correlator.evict(&message_id);
                Err(ChannelError::Timeout)
            }
            Ok(Err(_)) => Err(ChannelError::Disconnected),
            Ok(Ok(response)) => {
                if response.kind == server_types::ERROR {
                    Err(ChannelError::Server {
                        message: response.error_message(),
                    })
                } else {
                    Ok(response)
                }
            }
        }
    }

    /// Route one inbound envelope: correlated responses first, then the
    /// connection-level types, then registered push handlers.
    pub(crate) fn dispatch(&self, envelope: ServerEnvelope) {
        if envelope.message_id.is_some() && self.inner.correlator.complete(envelope.clone()) {
            return;
        }

        match envelope.kind.as_str() {
            server_types::CONNECTED => {
                let devices = parse_devices(envelope.data.get("online_devices"));
                self.inner.shared.set_online_devices(devices);
            }
            server_types::ONLINE_DEVICES => {
                let devices = parse_devices(envelope.data.get("devices"));
                self.inner.shared.set_online_devices(devices);
            }
            server_types::PONG => {
                debug!("Heartbeat pong received");
            }
            kind => {
                let handler = self
                    .inner
                    .handlers
                    .read()
                    .expect("handlers lock poisoned")
                    .get(kind)
                    .cloned();
                match handler {
                    Some(handler) => handler(envelope),
                    None => debug!("No handler for message type '{}', dropping", kind),
                }
            }
        }
    }

    /// Teardown after the transport closed underneath us. No-op when a
    /// newer connection or an explicit disconnect already took over.
    fn on_transport_closed(&self, generation: u64, auth_rejected: bool) {
        if auth_rejected {
            self.inner.auth_rejected.store(true, Ordering::SeqCst);
        }

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        self.inner
            .outbound
            .write()
            .expect("outbound lock poisoned")
            .take();
        self.inner.correlator.fail_all();

        if auth_rejected {
            self.inner
                .shared
                .set_error("Authentication rejected by the server. Log in again.");
            return;
        }

        self.inner.shared.set_status(SyncStatus::Disconnected);

        if !self.inner.manual_close.load(Ordering::SeqCst) && self.should_auto_reconnect() {
            self.spawn_reconnect_loop();
        }
    }

    fn should_auto_reconnect(&self) -> bool {
        if self.inner.auth_rejected.load(Ordering::SeqCst) {
            return false;
        }
        let cfg = self.inner.config.get();
        cfg.enabled && cfg.is_logged_in()
    }

    /// Retry at a fixed interval until connected or no longer eligible
    fn spawn_reconnect_loop(&self) {
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let interval =
                    Duration::from_secs(client.inner.config.get().reconnect_interval_secs);
                tokio::time::sleep(interval).await;

                if client.inner.manual_close.load(Ordering::SeqCst)
                    || !client.should_auto_reconnect()
                {
                    break;
                }
                if client.is_connected() {
                    break;
                }

                match client.connect().await {
                    Ok(()) => {
                        info!("Reconnected to sync server");
                        break;
                    }
                    Err(e) => warn!("Reconnect attempt failed: {}", e),
                }
            }
            client.inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

fn parse_devices(value: Option<&serde_json::Value>) -> Vec<OnlineDevice> {
    value
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::state::SyncBus;

    fn client() -> ChannelClient {
        let bus = SyncBus::new();
        let config = ConfigStore::new(SyncConfig::default(), bus.clone());
        ChannelClient::new(config, SyncShared::new(bus))
    }

    #[tokio::test]
    async fn connect_without_token_fails_fast() {
        let c = client();
        match c.connect().await {
            Err(ChannelError::NotAuthenticated) => {}
            other => panic!("expected NotAuthenticated, got {other:?}"),
        }
        assert_eq!(c.inner.shared.status(), SyncStatus::Disconnected);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let c = client();
        let env = ClientEnvelope::new(actions::PING, serde_json::json!({}));
        assert!(matches!(c.send(env), Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn connected_envelope_updates_online_devices() {
        let c = client();
        c.dispatch(ServerEnvelope {
            kind: server_types::CONNECTED.into(),
            message_id: None,
            source_device_id: None,
            timestamp: None,
            data: serde_json::json!({
                "online_devices": [
                    {"device_id": "dev-b", "device_name": "desktop"}
                ]
            }),
        });

        let devices = c.inner.shared.snapshot().online_devices;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "dev-b");
    }

    #[tokio::test]
    async fn correlated_response_bypasses_push_handlers() {
        let c = client();
        let handled = Arc::new(AtomicBool::new(false));
        let flag = handled.clone();
        c.on(
            server_types::CLIPBOARD_SYNC,
            Arc::new(move |_| flag.store(true, Ordering::SeqCst)),
        );

        let rx = c.inner.correlator.register("m1");
        c.dispatch(ServerEnvelope {
            kind: server_types::CLIPBOARD_SYNC.into(),
            message_id: Some("m1".into()),
            source_device_id: None,
            timestamp: None,
            data: serde_json::Value::Null,
        });

        assert!(rx.await.is_ok());
        assert!(!handled.load(Ordering::SeqCst));
    }
}
