//! Live connection bookkeeping, grouped by authenticated client id.
//!
//! A single client id may hold several concurrent connections; each entry
//! here is only a handle to a connection's outbound frame queue. Connection
//! lifetime is owned by the stream task, not by this map. Mutation is
//! serialized by the router, which holds this manager under its lock.

use amb_core::ServerFrame;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Handle to one authenticated connection's outbound frame queue.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub conn_id: u64,
    pub outbox: mpsc::Sender<ServerFrame>,
}

#[derive(Debug, Default)]
pub struct ConnectionManager {
    by_client: HashMap<String, Vec<ConnHandle>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client_id: &str, handle: ConnHandle) {
        self.by_client
            .entry(client_id.to_string())
            .or_default()
            .push(handle);
    }

    /// Remove one connection; prunes the client's set when it empties.
    pub fn unregister(&mut self, client_id: &str, conn_id: u64) {
        if let Some(conns) = self.by_client.get_mut(client_id) {
            conns.retain(|c| c.conn_id != conn_id);
            if conns.is_empty() {
                self.by_client.remove(client_id);
            }
        }
    }

    /// Snapshot of the live connections for a client, for delivery fanout.
    pub fn connections_for(&self, client_id: &str) -> Vec<ConnHandle> {
        self.by_client.get(client_id).cloned().unwrap_or_default()
    }

    /// Live connection count per client id, for the status snapshot.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.by_client
            .iter()
            .map(|(id, conns)| (id.clone(), conns.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(conn_id: u64) -> ConnHandle {
        let (tx, _rx) = mpsc::channel(1);
        ConnHandle {
            conn_id,
            outbox: tx,
        }
    }

    #[test]
    fn register_groups_by_client() {
        let mut mgr = ConnectionManager::new();
        mgr.register("a", handle(1));
        mgr.register("a", handle(2));
        mgr.register("b", handle(3));

        assert_eq!(mgr.connections_for("a").len(), 2);
        assert_eq!(mgr.connections_for("b").len(), 1);
        assert!(mgr.connections_for("c").is_empty());
    }

    #[test]
    fn unregister_prunes_empty_sets() {
        let mut mgr = ConnectionManager::new();
        mgr.register("a", handle(1));
        mgr.register("a", handle(2));

        mgr.unregister("a", 1);
        assert_eq!(mgr.counts().get("a"), Some(&1));

        mgr.unregister("a", 2);
        assert!(mgr.counts().is_empty());

        // unknown client / conn is a no-op
        mgr.unregister("a", 2);
        mgr.unregister("ghost", 9);
    }

    #[test]
    fn counts_reflect_live_connections() {
        let mut mgr = ConnectionManager::new();
        mgr.register("a", handle(1));
        mgr.register("b", handle(2));
        mgr.register("b", handle(3));

        let counts = mgr.counts();
        assert_eq!(counts.get("a"), Some(&1));
        assert_eq!(counts.get("b"), Some(&2));
    }
}
