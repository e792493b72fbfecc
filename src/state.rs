//! Ephemeral sync state and the cross-window event bus
//!
//! Connection status lives only in memory and is re-derived from connection
//! events, so it must be explicitly broadcast for other windows to observe.
//! [`SyncBus`] is that pub/sub channel: a typed topic per event instead of ad
//! hoc key matching, carrying config-change, state-change and UI-refresh
//! notifications.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Connection status of the sync channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Disconnected
    }
}

/// A peer device currently connected to the same account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineDevice {
    pub device_id: String,
    pub device_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub connected_at: Option<String>,
}

/// Ephemeral sync state snapshot. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub last_sync_time: Option<String>,
    pub pending_count: u64,
    pub online_devices: Vec<OnlineDevice>,
}

/// Events published on the process bus
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Durable configuration changed (re-read it from the config store)
    ConfigChanged,

    /// Ephemeral state changed; carries the new snapshot
    StateChanged(SyncState),

    /// Remote mutations were applied; the history view should reload
    RefreshClipboardList,
}

/// Cross-window pub/sub bus
#[derive(Clone)]
pub struct SyncBus {
    sender: broadcast::Sender<BusEvent>,
}

impl SyncBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish; having no subscriber is not an error
    pub fn publish(&self, event: BusEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared owner of the ephemeral state.
///
/// Every mutation broadcasts the full snapshot on the bus; windows that did
/// not make the change replay the snapshot into their own view.
pub struct SyncShared {
    state: RwLock<SyncState>,
    bus: SyncBus,
}

impl SyncShared {
    pub fn new(bus: SyncBus) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(SyncState::default()),
            bus,
        })
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.read().expect("state lock poisoned").clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.read().expect("state lock poisoned").status
    }

    pub fn bus(&self) -> &SyncBus {
        &self.bus
    }

    fn mutate<F: FnOnce(&mut SyncState)>(&self, f: F) {
        let snapshot = {
            let mut state = self.state.write().expect("state lock poisoned");
            f(&mut state);
            state.clone()
        };
        self.bus.publish(BusEvent::StateChanged(snapshot));
    }

    pub fn set_status(&self, status: SyncStatus) {
        self.mutate(|s| {
            s.status = status;
            if status == SyncStatus::Connecting || status == SyncStatus::Connected {
                s.last_error = None;
            }
        });
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.mutate(|s| {
            s.status = SyncStatus::Error;
            s.last_error = Some(message.into());
        });
    }

    pub fn set_last_sync_now(&self) {
        self.mutate(|s| s.last_sync_time = Some(chrono::Utc::now().to_rfc3339()));
    }

    pub fn set_pending_count(&self, count: u64) {
        self.mutate(|s| s.pending_count = count);
    }

    pub fn set_online_devices(&self, devices: Vec<OnlineDevice>) {
        self.mutate(|s| s.online_devices = devices);
    }

    /// Replay a snapshot broadcast by another window without re-broadcasting
    pub fn apply_remote_snapshot(&self, snapshot: SyncState) {
        *self.state.write().expect("state lock poisoned") = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_clear_error() {
        let shared = SyncShared::new(SyncBus::new());
        shared.set_error("boom");
        assert_eq!(shared.status(), SyncStatus::Error);
        assert_eq!(shared.snapshot().last_error.as_deref(), Some("boom"));

        shared.set_status(SyncStatus::Connecting);
        assert!(shared.snapshot().last_error.is_none());
    }

    #[test]
    fn mutations_broadcast_snapshots() {
        let bus = SyncBus::new();
        let mut rx = bus.subscribe();
        let shared = SyncShared::new(bus);

        shared.set_pending_count(3);

        match rx.try_recv() {
            Ok(BusEvent::StateChanged(snapshot)) => assert_eq!(snapshot.pending_count, 3),
            other => panic!("expected StateChanged, got {other:?}"),
        }
    }

    #[test]
    fn remote_snapshot_replay_does_not_rebroadcast() {
        let bus = SyncBus::new();
        let shared = SyncShared::new(bus.clone());
        let mut rx = bus.subscribe();

        let mut snapshot = SyncState::default();
        snapshot.status = SyncStatus::Connected;
        shared.apply_remote_snapshot(snapshot);

        assert_eq!(shared.status(), SyncStatus::Connected);
        assert!(rx.try_recv().is_err());
    }
}
