//! Routing core: deliver to live connections or queue for later.
//!
//! Connection map and queue store live under one lock so that a recipient
//! coming online observes its backlog atomically: everything queued at the
//! moment of `auth_ok` is replayed into the new connection's outbox before
//! any envelope routed afterwards can reach it. All outbox writes are
//! non-blocking (`try_send`), so the lock is never held across IO.

use amb_core::{Envelope, ServerFrame};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::connections::{ConnHandle, ConnectionManager};
use crate::events::EventRing;
use crate::queue::QueueStore;

/// Outcome of routing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub delivered_to: usize,
    pub queued: bool,
}

pub struct Router {
    state: Mutex<RouterState>,
    events: Arc<EventRing>,
}

struct RouterState {
    conns: ConnectionManager,
    queues: QueueStore,
}

impl Router {
    pub fn new(queue_limit: usize, events: Arc<EventRing>) -> Self {
        Self {
            state: Mutex::new(RouterState {
                conns: ConnectionManager::new(),
                queues: QueueStore::new(queue_limit),
            }),
            events,
        }
    }

    /// Deliver `envelope` to every live connection of its recipient, or
    /// queue it when none exist. Individual outbox failures are logged and
    /// do not abort the fanout; nothing here retries.
    pub fn route(&self, envelope: Envelope) -> Delivery {
        let mut state = self.state.lock().expect("router lock poisoned");
        let conns = state.conns.connections_for(&envelope.to);

        if conns.is_empty() {
            let dropped = state.queues.enqueue(&envelope.to, envelope.clone());
            let depth = state.queues.depth(&envelope.to);
            drop(state);

            if let Some(old) = dropped {
                self.events.warn(
                    "queue_overflow",
                    format!("queue full for {}, dropped oldest envelope", envelope.to),
                    json!({"to": envelope.to, "droppedId": old.id}),
                );
            }
            self.events.warn(
                "queued",
                format!("{} offline, queued envelope from {}", envelope.to, envelope.from),
                json!({"id": envelope.id, "from": envelope.from, "to": envelope.to, "depth": depth}),
            );
            return Delivery {
                delivered_to: 0,
                queued: true,
            };
        }

        let delivered_to = conns.len();
        drop(state);

        for conn in &conns {
            let frame = ServerFrame::Message {
                envelope: envelope.clone(),
            };
            if let Err(e) = conn.outbox.try_send(frame) {
                debug!(conn_id = conn.conn_id, error = %e, "outbox write failed");
                self.events.warn(
                    "deliver_failed",
                    format!("write to {} connection failed, continuing fanout", envelope.to),
                    json!({"id": envelope.id, "to": envelope.to, "connId": conn.conn_id}),
                );
            }
        }

        self.events.info(
            "delivered",
            format!("routed {} -> {}", envelope.from, envelope.to),
            json!({"id": envelope.id, "from": envelope.from, "to": envelope.to, "deliveredTo": delivered_to}),
        );
        Delivery {
            delivered_to,
            queued: false,
        }
    }

    /// Bring an authenticated connection online: greet it with `auth_ok`
    /// (carrying the backlog depth), replay the backlog oldest-first, then
    /// register the handle for live delivery. Holding the lock across all
    /// three steps is what keeps replay ahead of any concurrent `route`.
    pub fn connect(&self, client_id: &str, handle: ConnHandle) -> usize {
        let mut state = self.state.lock().expect("router lock poisoned");
        let backlog = state.queues.drain(client_id);
        let depth = backlog.len();

        let _ = handle.outbox.try_send(ServerFrame::AuthOk {
            client_id: client_id.to_string(),
            queued: depth,
            ts: Utc::now(),
        });
        for envelope in backlog {
            let _ = handle.outbox.try_send(ServerFrame::Message { envelope });
        }
        state.conns.register(client_id, handle);
        drop(state);

        self.events.info(
            "client_online",
            format!("{client_id} authenticated"),
            json!({"clientId": client_id, "drained": depth}),
        );
        depth
    }

    pub fn disconnect(&self, client_id: &str, conn_id: u64) {
        let mut state = self.state.lock().expect("router lock poisoned");
        state.conns.unregister(client_id, conn_id);
    }

    /// Live connection counts per client, for the status snapshot.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.state.lock().expect("router lock poisoned").conns.counts()
    }

    /// Queue depth per recipient, for the status snapshot.
    pub fn queue_depths(&self) -> HashMap<String, usize> {
        self.state.lock().expect("router lock poisoned").queues.depths()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn envelope(id: &str, to: &str) -> Envelope {
        Envelope {
            id: id.into(),
            from: "a".into(),
            to: to.into(),
            kind: "message".into(),
            payload: Value::Null,
            correlation_id: None,
            ts: Utc::now(),
        }
    }

    fn router(limit: usize) -> Router {
        Router::new(limit, Arc::new(EventRing::new(None).unwrap()))
    }

    #[test]
    fn offline_recipient_queues() {
        let r = router(10);
        let d = r.route(envelope("1", "b"));
        assert_eq!(
            d,
            Delivery {
                delivered_to: 0,
                queued: true
            }
        );
        assert_eq!(r.queue_depths().get("b"), Some(&1));
    }

    #[test]
    fn online_recipient_gets_fanout() {
        let r = router(10);
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        r.connect("b", ConnHandle { conn_id: 1, outbox: tx1 });
        r.connect("b", ConnHandle { conn_id: 2, outbox: tx2 });

        // both connections got their auth_ok greeting
        assert!(matches!(rx1.try_recv().unwrap(), ServerFrame::AuthOk { .. }));
        assert!(matches!(rx2.try_recv().unwrap(), ServerFrame::AuthOk { .. }));

        let d = r.route(envelope("1", "b"));
        assert_eq!(
            d,
            Delivery {
                delivered_to: 2,
                queued: false
            }
        );
        assert!(matches!(rx1.try_recv().unwrap(), ServerFrame::Message { .. }));
        assert!(matches!(rx2.try_recv().unwrap(), ServerFrame::Message { .. }));
    }

    #[test]
    fn connect_replays_backlog_after_auth_ok() {
        let r = router(10);
        r.route(envelope("1", "b"));
        r.route(envelope("2", "b"));

        let (tx, mut rx) = mpsc::channel(16);
        let depth = r.connect("b", ConnHandle { conn_id: 1, outbox: tx });
        assert_eq!(depth, 2);

        match rx.try_recv().unwrap() {
            ServerFrame::AuthOk { queued, .. } => assert_eq!(queued, 2),
            other => panic!("expected auth_ok, got {other:?}"),
        }
        for expected in ["1", "2"] {
            match rx.try_recv().unwrap() {
                ServerFrame::Message { envelope } => assert_eq!(envelope.id, expected),
                other => panic!("expected message, got {other:?}"),
            }
        }
        assert!(r.queue_depths().is_empty());
    }

    #[test]
    fn disconnect_returns_client_to_queueing() {
        let r = router(10);
        let (tx, _rx) = mpsc::channel(8);
        r.connect("b", ConnHandle { conn_id: 1, outbox: tx });
        r.disconnect("b", 1);

        let d = r.route(envelope("1", "b"));
        assert!(d.queued);
        assert!(r.counts().is_empty());
    }

    #[test]
    fn full_outbox_does_not_abort_fanout() {
        let r = router(10);
        let (tx_full, _rx_full) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(8);
        r.connect("b", ConnHandle { conn_id: 1, outbox: tx_full }); // auth_ok fills it
        r.connect("b", ConnHandle { conn_id: 2, outbox: tx_ok });
        let _ = rx_ok.try_recv(); // discard auth_ok

        let d = r.route(envelope("1", "b"));
        assert_eq!(d.delivered_to, 2);
        assert!(matches!(rx_ok.try_recv().unwrap(), ServerFrame::Message { .. }));
    }

    #[test]
    fn delivery_serializes_with_wire_names() {
        let d = Delivery {
            delivered_to: 1,
            queued: false,
        };
        let v = serde_json::to_value(d).unwrap();
        assert_eq!(v, json!({"deliveredTo": 1, "queued": false}));
    }
}
