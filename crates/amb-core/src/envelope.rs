//! The routed envelope: the unit of data carried between clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One routed message.
///
/// `from` is always the authenticated identity of the originating connection
/// (or the operator-chosen `asClient` for HTTP-initiated sends); it is never
/// taken from client input. `ts` is assigned by the daemon at ingress.
/// `correlationId` is opaque and carried through untouched; it serializes as
/// `null` when absent so every envelope has the same shape on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub correlation_id: Option<String>,
    pub ts: DateTime<Utc>,
}

impl Envelope {
    /// Generate a fresh envelope id for frames that did not supply one.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}
