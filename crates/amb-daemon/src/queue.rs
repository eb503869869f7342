//! Per-recipient bounded FIFO of envelopes awaiting delivery.
//!
//! Queues exist only in process memory. Each is created lazily on first
//! enqueue and removed when drained; depth never exceeds the configured
//! limit (drop-oldest discipline).

use amb_core::Envelope;
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub struct QueueStore {
    queues: HashMap<String, VecDeque<Envelope>>,
    limit: usize,
}

impl QueueStore {
    pub fn new(limit: usize) -> Self {
        Self {
            queues: HashMap::new(),
            limit,
        }
    }

    /// Append an envelope for an offline recipient. Past the limit the
    /// oldest element is dropped and returned so the caller can report it.
    pub fn enqueue(&mut self, recipient: &str, envelope: Envelope) -> Option<Envelope> {
        let queue = self.queues.entry(recipient.to_string()).or_default();
        queue.push_back(envelope);
        if queue.len() > self.limit {
            queue.pop_front()
        } else {
            None
        }
    }

    /// Remove and return everything queued for `recipient`, oldest first.
    pub fn drain(&mut self, recipient: &str) -> Vec<Envelope> {
        self.queues
            .remove(recipient)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn depth(&self, recipient: &str) -> usize {
        self.queues.get(recipient).map(VecDeque::len).unwrap_or(0)
    }

    /// Depth per recipient, for the status snapshot.
    pub fn depths(&self) -> HashMap<String, usize> {
        self.queues
            .iter()
            .map(|(id, q)| (id.clone(), q.len()))
            .collect()
    }
}
