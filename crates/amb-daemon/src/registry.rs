//! Immutable registry of provisioned clients.
//!
//! Built once from the validated config and shared read-only; a future live
//! reload would swap the whole snapshot rather than mutate in place.

use amb_core::{BridgeError, BridgeResult, KeyDigest};
use std::collections::{HashMap, HashSet};

use crate::config::ClientDescriptor;

/// Wildcard token meaning "any registered client".
pub const WILDCARD: &str = "*";

/// Destination allowlist for one sender, parsed from the config form.
#[derive(Debug, Clone)]
enum Allowlist {
    Any,
    Only(HashSet<String>),
}

/// One provisioned client.
#[derive(Debug)]
pub struct ClientEntry {
    pub id: String,
    key: KeyDigest,
    /// Raw allowlist as configured, for `whoami` and status display.
    pub can_send_to: Vec<String>,
    allowed: Allowlist,
}

/// All provisioned clients, keyed by id. Read-only after construction.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientEntry>,
}

impl ClientRegistry {
    pub fn from_descriptors(descriptors: &[ClientDescriptor]) -> BridgeResult<Self> {
        let mut clients = HashMap::new();
        for d in descriptors {
            let allowed = if d.can_send_to.iter().any(|t| t == WILDCARD) {
                Allowlist::Any
            } else {
                Allowlist::Only(d.can_send_to.iter().cloned().collect())
            };
            let entry = ClientEntry {
                id: d.id.clone(),
                key: KeyDigest::parse_hex(&d.key_hash)
                    .map_err(|e| BridgeError::Config(format!("client {}: {e}", d.id)))?,
                can_send_to: d.can_send_to.clone(),
                allowed,
            };
            if clients.insert(d.id.clone(), entry).is_some() {
                return Err(BridgeError::Config(format!("duplicate client id: {}", d.id)));
            }
        }
        Ok(Self { clients })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ClientEntry> {
        self.clients.get(id)
    }

    /// Check a presented key against the registered hash for `id`.
    /// The digest comparison itself is constant-time.
    pub fn verify_key(&self, id: &str, api_key: &str) -> bool {
        self.clients
            .get(id)
            .map(|c| c.key.matches(api_key))
            .unwrap_or(false)
    }

    /// Whether `sender` may route to `target`. The wildcard permits any
    /// registered client, including the sender itself.
    pub fn route_allowed(&self, sender: &str, target: &str) -> bool {
        match self.clients.get(sender).map(|c| &c.allowed) {
            Some(Allowlist::Any) => self.contains(target),
            Some(Allowlist::Only(set)) => set.contains(target),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientEntry> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, key: &str, can_send_to: &[&str]) -> ClientDescriptor {
        ClientDescriptor {
            id: id.into(),
            key_hash: KeyDigest::of(key).to_hex(),
            can_send_to: can_send_to.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::from_descriptors(&[
            descriptor("agent-client", "ka", &["openclaw-server"]),
            descriptor("openclaw-server", "ks", &["*"]),
            descriptor("worker", "kw", &[]),
        ])
        .unwrap()
    }

    #[test]
    fn verify_key_accepts_correct_secret_only() {
        let reg = registry();
        assert!(reg.verify_key("agent-client", "ka"));
        assert!(!reg.verify_key("agent-client", "ks"));
        assert!(!reg.verify_key("ghost", "ka"));
    }

    #[test]
    fn explicit_allowlist_is_enforced() {
        let reg = registry();
        assert!(reg.route_allowed("agent-client", "openclaw-server"));
        assert!(!reg.route_allowed("agent-client", "worker"));
        assert!(!reg.route_allowed("agent-client", "agent-client"));
    }

    #[test]
    fn wildcard_permits_any_registered_client_including_self() {
        let reg = registry();
        assert!(reg.route_allowed("openclaw-server", "agent-client"));
        assert!(reg.route_allowed("openclaw-server", "worker"));
        assert!(reg.route_allowed("openclaw-server", "openclaw-server"));
        assert!(!reg.route_allowed("openclaw-server", "unregistered"));
    }

    #[test]
    fn empty_allowlist_permits_nothing() {
        let reg = registry();
        assert!(!reg.route_allowed("worker", "agent-client"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = ClientRegistry::from_descriptors(&[
            descriptor("a", "k1", &[]),
            descriptor("a", "k2", &[]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
