//! Newline-delimited JSON framing for the bridge stream.
//!
//! Wire format: one UTF-8 JSON object per line, `\n` terminated. A frame is
//! oversized when the line (without its terminator) exceeds the configured
//! maximum; the connection must be destroyed when the parse buffer grows
//! beyond twice that maximum.

use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};

/// One outcome of feeding bytes into the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete line within the frame limit.
    Line(Vec<u8>),
    /// A complete line longer than the frame limit; its bytes are dropped.
    Oversized { len: usize },
}

/// Encode a serializable value into a newline-terminated JSON frame.
pub fn encode_frame<T: Serialize>(value: &T) -> BridgeResult<Vec<u8>> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Streaming line decoder: accumulates bytes and yields complete lines.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl LineDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    /// Feed bytes into the decoder and return all completed lines.
    ///
    /// Oversized lines are reported (and skipped) rather than failing the
    /// decoder, so the connection can keep running after an `error` frame.
    /// Returns `Err` only when the undelimited buffer exceeds twice the
    /// frame limit, which must terminate the connection.
    pub fn feed(&mut self, data: &[u8]) -> BridgeResult<Vec<LineEvent>> {
        self.buffer.extend_from_slice(data);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop(); // trailing '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_frame {
                events.push(LineEvent::Oversized { len: line.len() });
            } else {
                events.push(LineEvent::Line(line));
            }
        }

        if self.buffer.len() > self.max_frame * 2 {
            return Err(BridgeError::BufferExceeded {
                size: self.buffer.len(),
                max: self.max_frame * 2,
            });
        }

        Ok(events)
    }

    /// Number of bytes awaiting a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
