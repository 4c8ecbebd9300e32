//! Utility module for ledger amounts.
//!
//! Re-exports exact-decimal parsing and formatting helpers used by the transaction parser.
/// Amount parsing and display
pub mod index;

pub use index::{format_amount, parse_amount};
