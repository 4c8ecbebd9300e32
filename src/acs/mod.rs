//! Active contract set module
//!
//! This module keeps per-observer views of the ledger's active contract set
//! current. A [`AcsSynchronizer`] folds update deltas onto a baseline snapshot
//! for one key; the [`AcsCacheManager`] shares synchronizers across callers and
//! saves evicted ones through a [`StateStore`].

/// Synchronizer cache with LRU and TTL eviction
mod cache;
/// Saving and restoring snapshot states
mod persistence;
/// Cache counters
mod stats;
/// Durable state stores
mod store;
/// Snapshot plus delta synchronization
mod synchronizer;
/// Keys, snapshot states, deltas and configuration
mod types;

pub use cache::{AcsCacheManager, CacheConfig};
pub use persistence::{STATE_FORMAT_VERSION, StatePersistenceService};
pub use stats::CacheStats;
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError};
pub use synchronizer::{AcsSynchronizer, extract_events};
pub use types::*;
