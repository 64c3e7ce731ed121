//! Session relay core
//!
//! Dispatches client events over the connection fabric: join/leave, content
//! metadata, encrypted chunks, rename/remove/pin, clear-all, listing, and
//! replay of existing content to late joiners.
//!
//! Key behaviors:
//! - Per-event authorization against the session registry
//! - Room broadcast with per-publisher FIFO ordering
//! - Store-and-stream policy for large files (no real-time chunk fanout)
//! - Inactivity expiry sweep notifying connected members

pub mod error;
pub mod hub;
pub mod wire;

pub use error::{RelayError, RelayResult};
pub use hub::{RelayHub, RelayHubConfig, RelayStats};
pub use wire::{AckPayload, ClientEvent, InboundFrame, OutboundFrame, ServerEvent};
