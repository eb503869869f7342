//! Bounded runtime event ring, mirrored to a JSON-lines log file.
//!
//! The ring is observability only; nothing in the routing path reads it.
//! Ring and file share one mutex so there is a single writer for both, and
//! every event also emits the matching `tracing` line.

use amb_core::{BridgeError, BridgeResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Maximum events retained in memory; older entries are dropped.
pub const RING_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeEvent {
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

pub struct EventRing {
    inner: Mutex<RingInner>,
}

struct RingInner {
    events: VecDeque<BridgeEvent>,
    log: Option<File>,
}

impl EventRing {
    /// Create the ring, opening the log file in append mode when given.
    pub fn new(log_file: Option<&Path>) -> BridgeResult<Self> {
        let log = log_file
            .map(|path| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        BridgeError::Config(format!(
                            "cannot open log file {}: {e}",
                            path.display()
                        ))
                    })
            })
            .transpose()?;
        Ok(Self {
            inner: Mutex::new(RingInner {
                events: VecDeque::new(),
                log,
            }),
        })
    }

    pub fn record(&self, level: EventLevel, kind: &str, message: impl Into<String>, details: Value) {
        let event = BridgeEvent {
            ts: Utc::now(),
            level,
            kind: kind.to_string(),
            message: message.into(),
            details,
        };

        match level {
            EventLevel::Info => info!(kind, "{}", event.message),
            EventLevel::Warn => warn!(kind, "{}", event.message),
            EventLevel::Error => error!(kind, "{}", event.message),
        }

        let mut inner = self.inner.lock().expect("event ring lock poisoned");
        if let Some(log) = inner.log.as_mut() {
            if let Ok(line) = serde_json::to_vec(&event) {
                // log mirroring is best-effort; the ring stays authoritative
                let _ = log.write_all(&line);
                let _ = log.write_all(b"\n");
            }
        }
        inner.events.push_back(event);
        if inner.events.len() > RING_MAX {
            inner.events.pop_front();
        }
    }

    pub fn info(&self, kind: &str, message: impl Into<String>, details: Value) {
        self.record(EventLevel::Info, kind, message, details);
    }

    pub fn warn(&self, kind: &str, message: impl Into<String>, details: Value) {
        self.record(EventLevel::Warn, kind, message, details);
    }

    pub fn error(&self, kind: &str, message: impl Into<String>, details: Value) {
        self.record(EventLevel::Error, kind, message, details);
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<BridgeEvent> {
        let inner = self.inner.lock().expect("event ring lock poisoned");
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("event ring lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
