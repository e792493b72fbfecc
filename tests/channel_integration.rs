//! Channel client tests against an in-process WebSocket server

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

use cliprelay::channel::{actions, ChannelClient, ChannelError, ClientEnvelope};
use cliprelay::config::{ConfigStore, SyncConfig};
use cliprelay::state::{SyncBus, SyncShared, SyncStatus};

type ServerSocket = WebSocketStream<tokio::net::TcpStream>;

/// Accept connections and hand each socket to the channel for inspection
async fn spawn_server() -> (u16, mpsc::UnboundedReceiver<ServerSocket>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let ws = accept_async(stream).await.unwrap();
            if tx.send(ws).is_err() {
                break;
            }
        }
    });

    (port, rx)
}

fn client_for(port: u16, enabled: bool) -> (ChannelClient, Arc<SyncShared>) {
    let mut config = SyncConfig::default();
    config.server_url = format!("http://127.0.0.1:{port}");
    config.token = Some("test-token".into());
    config.enabled = enabled;
    config.reconnect_interval_secs = 1;
    config.heartbeat_interval_secs = 60;

    let bus = SyncBus::new();
    let config = ConfigStore::new(config, bus.clone());
    let shared = SyncShared::new(bus);
    (ChannelClient::new(config, shared.clone()), shared)
}

async fn next_text(ws: &mut ServerSocket) -> serde_json::Value {
    loop {
        match ws.next().await.expect("connection ended").unwrap() {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn connect_reports_connected_and_sends_query_credentials() {
    let (port, mut conns) = spawn_server().await;
    let (client, shared) = client_for(port, true);

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(shared.status(), SyncStatus::Connected);

    // Server saw exactly one connection
    let _ws = tokio::time::timeout(Duration::from_secs(2), conns.recv())
        .await
        .unwrap()
        .unwrap();

    client.disconnect(true);
}

#[tokio::test]
async fn send_and_wait_resolves_the_matching_response() {
    let (port, mut conns) = spawn_server().await;
    let (client, _shared) = client_for(port, true);
    client.connect().await.unwrap();
    let mut ws = conns.recv().await.unwrap();

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_and_wait(ClientEnvelope::new(
                    actions::GET_ONLINE_DEVICES,
                    serde_json::json!({}),
                ))
                .await
        }
    });

    let envelope = next_text(&mut ws).await;
    assert_eq!(envelope["action"], "get_online_devices");
    let message_id = envelope["message_id"].as_str().unwrap();

    // Respond out of order first: an unrelated id must not resolve it
    let unrelated = serde_json::json!({
        "type": "online_devices",
        "message_id": "someone-else",
        "data": {"devices": []}
    });
    ws.send(WsMessage::Text(unrelated.to_string().into()))
        .await
        .unwrap();

    let response = serde_json::json!({
        "type": "online_devices",
        "message_id": message_id,
        "data": {"devices": [{"device_id": "dev-b", "device_name": "desktop"}]}
    });
    ws.send(WsMessage::Text(response.to_string().into()))
        .await
        .unwrap();

    let resolved = request.await.unwrap().unwrap();
    assert_eq!(resolved.message_id.as_deref(), Some(message_id));
    client.disconnect(true);
}

#[tokio::test]
async fn error_typed_response_rejects_the_request() {
    let (port, mut conns) = spawn_server().await;
    let (client, _shared) = client_for(port, true);
    client.connect().await.unwrap();
    let mut ws = conns.recv().await.unwrap();

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_and_wait(ClientEnvelope::new(
                    actions::SYNC_CLIPBOARD,
                    serde_json::json!({}),
                ))
                .await
        }
    });

    let envelope = next_text(&mut ws).await;
    let message_id = envelope["message_id"].as_str().unwrap();

    let response = serde_json::json!({
        "type": "error",
        "message_id": message_id,
        "data": {"message": "quota exceeded"}
    });
    ws.send(WsMessage::Text(response.to_string().into()))
        .await
        .unwrap();

    match request.await.unwrap() {
        Err(ChannelError::Server { message }) => assert_eq!(message, "quota exceeded"),
        other => panic!("expected server error, got {other:?}"),
    }
    client.disconnect(true);
}

#[tokio::test]
async fn disconnect_fails_requests_in_flight() {
    let (port, mut conns) = spawn_server().await;
    let (client, _shared) = client_for(port, false);
    client.connect().await.unwrap();
    let mut ws = conns.recv().await.unwrap();

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_and_wait(ClientEnvelope::new(
                    actions::FETCH_HISTORY,
                    serde_json::json!({"limit": 10}),
                ))
                .await
        }
    });

    // Wait until the request is on the wire, then drop the connection
    let _ = next_text(&mut ws).await;
    client.disconnect(true);

    match tokio::time::timeout(Duration::from_secs(2), request)
        .await
        .unwrap()
        .unwrap()
    {
        Err(ChannelError::Disconnected) => {}
        other => panic!("expected immediate disconnect failure, got {other:?}"),
    }
}

#[tokio::test]
async fn dropped_connection_reconnects_when_enabled() {
    let (port, mut conns) = spawn_server().await;
    let (client, shared) = client_for(port, true);
    client.connect().await.unwrap();

    let ws = conns.recv().await.unwrap();
    drop(ws); // server kills the connection

    // The client reconnects after the fixed interval
    let second = tokio::time::timeout(Duration::from_secs(5), conns.recv())
        .await
        .expect("no reconnect within the interval")
        .unwrap();

    // Status converges back to connected
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(shared.status(), SyncStatus::Connected);

    drop(second);
    client.disconnect(true);
}

#[tokio::test]
async fn manual_disconnect_suppresses_reconnect() {
    let (port, mut conns) = spawn_server().await;
    let (client, shared) = client_for(port, true);
    client.connect().await.unwrap();
    let _ws = conns.recv().await.unwrap();

    client.disconnect(true);
    assert_eq!(shared.status(), SyncStatus::Disconnected);

    // No new connection shows up
    let outcome = tokio::time::timeout(Duration::from_secs(3), conns.recv()).await;
    assert!(outcome.is_err(), "client reconnected after manual disconnect");
}

#[tokio::test]
async fn auth_rejection_close_code_stops_reconnecting() {
    let (port, mut conns) = spawn_server().await;
    let (client, shared) = client_for(port, true);
    client.connect().await.unwrap();
    let mut ws = conns.recv().await.unwrap();

    ws.close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: "invalid token".into(),
    }))
    .await
    .unwrap();

    // The client marks the error and does not come back
    let outcome = tokio::time::timeout(Duration::from_secs(3), conns.recv()).await;
    assert!(outcome.is_err(), "client reconnected after auth rejection");
    assert_eq!(shared.status(), SyncStatus::Error);
}
