//! Cache of synchronizers keyed by view fingerprint.
//!
//! The `AcsCacheManager` hands out one [`AcsSynchronizer`] per (ledger, party,
//! template or interface) and bounds how many it keeps: the least recently used
//! entry is evicted when the cache is full, and entries expire a fixed time
//! after they were created. With persistence enabled, evicted and expired
//! entries are saved to a [`StateStore`] and restored on the next miss for the
//! same key. Storage failures are logged and never reach the caller.
//!
//! Evicting an entry does not cancel updates already running on it: callers
//! hold their own `Arc` to the synchronizer, and the saved state is its last
//! published snapshot.

use crate::acs::persistence::StatePersistenceService;
use crate::acs::stats::CacheStats;
use crate::acs::store::StateStore;
use crate::acs::synchronizer::AcsSynchronizer;
use crate::acs::types::{AcsConfig, AcsError, AcsKey};
use crate::ledger::{ActiveContract, LedgerGateway, Offset};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the synchronizer cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries kept before the least recently used one is evicted.
    pub max_cache_size: usize,
    /// Lifetime of an entry, counted from its creation.
    pub entry_expiration: Duration,
    /// Save evicted entries and restore them on the next miss.
    pub enable_persistence: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 100,
            entry_expiration: Duration::from_secs(10 * 60),
            enable_persistence: false,
        }
    }
}

struct CacheEntry {
    synchronizer: Arc<AcsSynchronizer>,
    created_at: Instant,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Logical clock ordering entry use.
    clock: u64,
    stats: CacheStats,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

pub struct AcsCacheManager<G: LedgerGateway + ?Sized> {
    gateway: Arc<G>,
    config: CacheConfig,
    acs_config: AcsConfig,
    persistence: Option<StatePersistenceService>,
    state: Mutex<CacheState>,
}

impl<G: LedgerGateway + ?Sized> AcsCacheManager<G> {
    pub fn new(gateway: Arc<G>, config: CacheConfig, acs_config: AcsConfig) -> Self {
        Self {
            gateway,
            config,
            acs_config,
            persistence: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Use `store` for evicted entries. Ignored unless persistence is enabled.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        if self.config.enable_persistence {
            self.persistence = Some(StatePersistenceService::new(store));
        } else {
            debug!("Persistence disabled, not using the provided state store");
        }
        self
    }

    /// The synchronizer for `key`, restored or created on a miss.
    pub async fn get(&self, key: &AcsKey) -> Arc<AcsSynchronizer> {
        let fingerprint = key.fingerprint(self.gateway.endpoint());
        let mut state = self.state.lock().await;
        self.purge_expired(&mut state).await;

        let start = Instant::now();
        let now = state.tick();
        let hit = state.entries.get_mut(&fingerprint).map(|entry| {
            entry.last_used = now;
            entry.synchronizer.clone()
        });
        state.stats.total_lookup_time += start.elapsed();

        if let Some(synchronizer) = hit {
            state.stats.hits += 1;
            debug!("Cache hit for {}", fingerprint);
            return synchronizer;
        }
        state.stats.misses += 1;
        debug!("Cache miss for {}", fingerprint);

        let synchronizer = Arc::new(self.restore_or_create(&mut state, key, &fingerprint).await);
        state.entries.insert(
            fingerprint,
            CacheEntry {
                synchronizer: synchronizer.clone(),
                created_at: Instant::now(),
                last_used: now,
            },
        );
        self.evict_overflow(&mut state).await;
        synchronizer
    }

    async fn restore_or_create(
        &self,
        state: &mut CacheState,
        key: &AcsKey,
        fingerprint: &str,
    ) -> AcsSynchronizer {
        if let Some(persistence) = &self.persistence {
            match persistence.restore_state(fingerprint).await {
                Ok(Some(snapshot)) => {
                    state.stats.restores += 1;
                    return AcsSynchronizer::with_state(key.clone(), self.acs_config.clone(), snapshot);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to restore ACS state for {}, starting fresh: {}", fingerprint, e);
                    state.stats.persistence_failures += 1;
                }
            }
        }
        AcsSynchronizer::new(key.clone(), self.acs_config.clone())
    }

    async fn purge_expired(&self, state: &mut CacheState) {
        let ttl = self.config.entry_expiration;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() >= ttl)
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in expired {
            if let Some(entry) = state.entries.remove(&fingerprint) {
                debug!("Entry {} expired, evicting", fingerprint);
                state.stats.expirations += 1;
                self.persist(state, &fingerprint, &entry.synchronizer).await;
            }
        }
    }

    async fn evict_overflow(&self, state: &mut CacheState) {
        while state.entries.len() > self.config.max_cache_size {
            let Some(oldest) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(fingerprint, _)| fingerprint.clone())
            else {
                break;
            };
            if let Some(entry) = state.entries.remove(&oldest) {
                debug!("Cache full, evicting least recently used {}", oldest);
                state.stats.evictions += 1;
                self.persist(state, &oldest, &entry.synchronizer).await;
            }
        }
    }

    async fn persist(&self, state: &mut CacheState, fingerprint: &str, synchronizer: &AcsSynchronizer) {
        let (Some(persistence), Some(snapshot)) = (&self.persistence, synchronizer.snapshot()) else {
            return;
        };
        if let Err(e) = persistence.save_state(fingerprint, &snapshot).await {
            warn!("Failed to persist ACS state for {}, keeping it in memory only: {}", fingerprint, e);
            state.stats.persistence_failures += 1;
        }
    }

    /// Active contracts for `key` at `offset`.
    pub async fn active_contracts(
        &self,
        key: &AcsKey,
        offset: Offset,
    ) -> Result<Vec<ActiveContract>, AcsError> {
        let synchronizer = self.get(key).await;
        synchronizer.update(offset, self.gateway.as_ref()).await
    }

    pub async fn active_contracts_for_template(
        &self,
        offset: Offset,
        party: Option<&str>,
        template_id: &str,
    ) -> Result<Vec<ActiveContract>, AcsError> {
        self.active_contracts(&AcsKey::for_template(party, template_id), offset)
            .await
    }

    pub async fn active_contracts_for_interface(
        &self,
        offset: Offset,
        party: Option<&str>,
        interface_id: &str,
    ) -> Result<Vec<ActiveContract>, AcsError> {
        self.active_contracts(&AcsKey::for_interface(party, interface_id), offset)
            .await
    }

    /// Persist every cached entry, e.g. before shutdown.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        let entries: Vec<(String, Arc<AcsSynchronizer>)> = state
            .entries
            .iter()
            .map(|(fingerprint, entry)| (fingerprint.clone(), entry.synchronizer.clone()))
            .collect();
        for (fingerprint, synchronizer) in &entries {
            self.persist(&mut state, fingerprint, synchronizer).await;
        }
        info!("Flushed {} cached ACS entries", entries.len());
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn stats_summary(&self) -> String {
        let state = self.state.lock().await;
        state.stats.summary(state.entries.len())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
