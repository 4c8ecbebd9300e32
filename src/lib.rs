//! Client-side state reconciliation for a ledger JSON API.
//!
//! [`acs`] keeps active contract sets current per observer, [`txparse`] turns raw
//! transactions into token-standard events, and [`ledger`] provides the wire
//! types and gateway both read through.

pub mod acs;
pub mod ledger;
pub mod txparse;
pub mod utils;
