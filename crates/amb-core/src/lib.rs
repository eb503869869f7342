//! amb-core: shared protocol library for the agent message bridge.
//!
//! Provides the newline-delimited JSON codec, wire frame types, the routed
//! envelope model, secret digests, and the common error type.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frames;
pub mod secrets;

// Re-export commonly used items at crate root.
pub use codec::{encode_frame, LineDecoder, LineEvent};
pub use envelope::Envelope;
pub use error::{BridgeError, BridgeResult};
pub use frames::{ClientFrame, ErrorCode, ServerFrame};
pub use secrets::KeyDigest;
