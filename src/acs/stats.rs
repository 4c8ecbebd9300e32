use std::time::Duration;

/// Counters for one cache manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their time to live elapsed.
    pub expirations: u64,
    /// Misses answered from the durable store.
    pub restores: u64,
    /// Saves or restores that failed and were skipped.
    pub persistence_failures: u64,
    pub total_lookup_time: Duration,
}

impl CacheStats {
    pub fn total_calls(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit rate in percent; zero before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.total_calls() {
            0 => 0.0,
            total => self.hits as f64 / total as f64 * 100.0,
        }
    }

    pub fn average_lookup_time(&self) -> Duration {
        match self.total_calls() {
            0 => Duration::ZERO,
            total => self.total_lookup_time / total as u32,
        }
    }

    /// Get a human-readable summary of the cache statistics
    pub fn summary(&self, cache_size: usize) -> String {
        format!(
            "{} calls ({} hits, {} misses, {:.2}% hit rate), {} cached, {} evicted, {} expired, {} restored, {} persistence failures, {:.3} ms average lookup",
            self.total_calls(),
            self.hits,
            self.misses,
            self.hit_rate(),
            cache_size,
            self.evictions,
            self.expirations,
            self.restores,
            self.persistence_failures,
            self.average_lookup_time().as_secs_f64() * 1000.0,
        )
    }
}
