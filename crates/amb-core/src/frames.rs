//! Wire frame types for the bridge stream protocol.
//!
//! Each frame is one JSON object tagged by an `action` field, terminated by
//! a newline. Inbound frames come from clients, outbound frames only from
//! the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;

fn default_send_type() -> String {
    "message".to_string()
}

/// Frames sent by clients to the daemon.
///
/// Unknown fields are ignored: in particular a client-supplied `from` on a
/// `send` frame never reaches the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "apiKey")]
        api_key: String,
    },
    Ping,
    Whoami,
    Send {
        #[serde(default)]
        to: Option<String>,
        #[serde(rename = "type", default = "default_send_type")]
        kind: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        id: Option<String>,
        #[serde(rename = "correlationId", default)]
        correlation_id: Option<String>,
    },
    /// Any action the daemon does not understand.
    #[serde(other)]
    Unknown,
}

/// Frames sent by the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk {
        #[serde(rename = "clientId")]
        client_id: String,
        /// Queue depth for this client at the moment of authentication.
        queued: usize,
        ts: DateTime<Utc>,
    },
    AuthFailed,
    Pong {
        ts: DateTime<Utc>,
    },
    Whoami {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "canSendTo")]
        can_send_to: Vec<String>,
        ts: DateTime<Utc>,
    },
    Sent {
        id: String,
        #[serde(rename = "deliveredTo")]
        delivered_to: usize,
        queued: bool,
        ts: DateTime<Utc>,
    },
    Message {
        envelope: Envelope,
    },
    Error {
        error: ErrorCode,
    },
}

/// Protocol error codes carried in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthRequired,
    MissingTo,
    UnknownTarget,
    RouteNotAllowed,
    UnknownAction,
    InvalidJson,
    MessageTooLarge,
    BufferExceeded,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "auth_required",
            ErrorCode::MissingTo => "missing_to",
            ErrorCode::UnknownTarget => "unknown_target",
            ErrorCode::RouteNotAllowed => "route_not_allowed",
            ErrorCode::UnknownAction => "unknown_action",
            ErrorCode::InvalidJson => "invalid_json",
            ErrorCode::MessageTooLarge => "message_too_large",
            ErrorCode::BufferExceeded => "buffer_exceeded",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
