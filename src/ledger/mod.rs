//! Ledger integration module
//!
//! This module provides the wire types for the JSON Ledger API, the abstract
//! [`LedgerGateway`] the reconciliation layer reads through, and an HTTP/WebSocket
//! client implementing it.

/// JSON Ledger API client
mod client;
/// Gateway trait and stream alias
mod gateway;
/// Back-off switch for streaming reads
mod stream_switch;
/// Type definitions for ledger data structures
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::JsonLedgerClient;
pub use gateway::{ContractStream, LedgerGateway};
pub use stream_switch::StreamSwitch;
pub use types::*;
