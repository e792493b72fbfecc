//! Request/response correlation over the duplex channel
//!
//! Requests carry a client-generated `message_id`; the first inbound
//! envelope echoing that id resolves the waiting caller. Resolution is
//! at-most-once: completing an id consumes the slot, so a duplicate echo
//! falls through to the push-handler path instead.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use super::ServerEnvelope;

/// In-flight request table, keyed by message id.
///
/// Dropping a sender makes the paired receiver resolve with a recv error,
/// which callers surface as a disconnect. `fail_all` uses that to reject
/// every pending request when the connection goes away.
pub struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<ServerEnvelope>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a message id and get the receiver its response resolves
    pub fn register(&self, message_id: &str) -> oneshot::Receiver<ServerEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(message_id.to_string(), tx);
        rx
    }

    /// Resolve the request waiting on this envelope's message id.
    ///
    /// Returns true when the envelope was consumed by a waiter.
    pub fn complete(&self, envelope: ServerEnvelope) -> bool {
        let Some(id) = envelope.message_id.as_deref() else {
            return false;
        };

        let waiter = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(id);

        match waiter {
            Some(tx) => {
                // Err means the caller stopped waiting (timeout); drop the
                // envelope either way, the slot is already gone.
                let _ = tx.send(envelope);
                true
            }
            None => false,
        }
    }

    /// Forget a registration, e.g. after a send failure or timeout
    pub fn evict(&self, message_id: &str) {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(message_id);
    }

    /// Reject every in-flight request by dropping its sender
    pub fn fail_all(&self) {
        let drained: HashMap<_, _> = std::mem::take(
            &mut *self.pending.lock().expect("correlator lock poisoned"),
        );
        if !drained.is_empty() {
            debug!("Failing {} in-flight requests", drained.len());
        }
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str) -> ServerEnvelope {
        ServerEnvelope {
            kind: "sync_confirmed".into(),
            message_id: Some(id.into()),
            source_device_id: None,
            timestamp: None,
            data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn completes_registered_request() {
        let correlator = Correlator::new();
        let rx = correlator.register("m1");

        assert!(correlator.complete(response("m1")));
        let envelope = rx.await.unwrap();
        assert_eq!(envelope.message_id.as_deref(), Some("m1"));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn resolution_is_at_most_once() {
        let correlator = Correlator::new();
        let _rx = correlator.register("m1");

        assert!(correlator.complete(response("m1")));
        // The duplicate echo finds no waiter
        assert!(!correlator.complete(response("m1")));
    }

    #[tokio::test]
    async fn unknown_and_missing_ids_are_not_consumed() {
        let correlator = Correlator::new();
        assert!(!correlator.complete(response("never-registered")));

        let mut push = response("x");
        push.message_id = None;
        assert!(!correlator.complete(push));
    }

    #[tokio::test]
    async fn fail_all_rejects_every_waiter() {
        let correlator = Correlator::new();
        let rx1 = correlator.register("m1");
        let rx2 = correlator.register("m2");

        correlator.fail_all();

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn evict_forgets_registration() {
        let correlator = Correlator::new();
        let _rx = correlator.register("m1");
        correlator.evict("m1");

        assert!(!correlator.complete(response("m1")));
    }
}
