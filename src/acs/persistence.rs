//! State persistence for evicted synchronizers.
//!
//! This module provides the `StatePersistenceService`, which saves a
//! synchronizer's snapshot state when it leaves the cache and restores it on the
//! next miss for the same key. States are wrapped in a versioned envelope so that
//! stale formats and inconsistent states are discarded instead of resumed from.

use crate::acs::store::{StateStore, StoreError};
use crate::acs::types::AcsSnapshotState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Envelope format written by this version.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    version: u32,
    saved_at: DateTime<Utc>,
    state: AcsSnapshotState,
}

/// Service for saving and restoring synchronizer states through a [`StateStore`].
#[derive(Clone)]
pub struct StatePersistenceService {
    store: Arc<dyn StateStore>,
}

impl StatePersistenceService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Save `state` under the cache fingerprint `key`.
    pub async fn save_state(&self, key: &str, state: &AcsSnapshotState) -> Result<(), StoreError> {
        let envelope = PersistedState {
            version: STATE_FORMAT_VERSION,
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let serialized = serde_json::to_string(&envelope)?;
        self.store.set(key, &serialized).await?;
        info!(
            "Persisted ACS state for {} at offset {} ({} deltas)",
            key,
            state.last_seen_offset,
            state.pending_deltas.len()
        );
        Ok(())
    }

    /// Restore the state saved under `key`.
    ///
    /// Returns `None` when nothing was saved, or when the saved state has an
    /// unknown format or violates the snapshot invariants; such entries are removed.
    pub async fn restore_state(&self, key: &str) -> Result<Option<AcsSnapshotState>, StoreError> {
        let Some(serialized) = self.store.get(key).await? else {
            return Ok(None);
        };
        let envelope: PersistedState = serde_json::from_str(&serialized)?;

        if envelope.version != STATE_FORMAT_VERSION {
            warn!(
                "Discarding ACS state for {} with format version {}",
                key, envelope.version
            );
            self.store.remove(key).await?;
            return Ok(None);
        }
        if !envelope.state.is_consistent() {
            warn!(
                "Discarding inconsistent ACS state for {} saved at {}",
                key, envelope.saved_at
            );
            self.store.remove(key).await?;
            return Ok(None);
        }

        info!(
            "Restored ACS state for {} saved at {} (baseline {}, last seen {})",
            key,
            envelope.saved_at.to_rfc3339(),
            envelope.state.baseline_offset,
            envelope.state.last_seen_offset
        );
        Ok(Some(envelope.state))
    }
}
