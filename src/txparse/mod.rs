//! Transaction normalization module
//!
//! Turns raw ledger transactions into token-standard events from one party's
//! point of view: transfers in and out, instruction resolutions, burns, mints,
//! locks and merges, each with its exact holdings change.

/// Update-page history building
pub mod history;
/// Exact-decimal holdings arithmetic
pub mod holdings;
/// Metadata keys and interface view helpers
pub mod meta;
/// Event tree walk
mod parser;
/// Normalized output types
mod types;

pub use history::{parse_updates, parse_updates_for_parties};
pub use parser::{ROOT_PARENT_CHOICE, TransactionParser, TxKind};
pub use types::*;
