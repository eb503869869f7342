//! amb-daemon: the agent message bridge daemon.
//!
//! Accepts local stream connections from provisioned clients, authenticates
//! them against hashed keys, routes envelopes under per-sender allowlists,
//! queues for offline recipients, and serves a token-gated HTTP control
//! plane. The binary entry point lives in `main.rs`; the library surface
//! exists so integration tests can drive a daemon in-process.

pub mod config;
pub mod connections;
pub mod daemon;
pub mod events;
pub mod http;
pub mod listener;
pub mod queue;
pub mod registry;
pub mod router;

pub use config::Config;
pub use daemon::{BridgeCtx, BridgeDaemon};
