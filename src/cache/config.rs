//! Cache policy configuration.
//!
//! Per-namespace TTLs, negative-result policy and store sizing, resolved from
//! the `[cache]` section of `usercache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::CacheSettings;

use super::keys::Namespace;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for entries in the `users` namespace.
    pub entity_ttl_seconds: u64,
    /// TTL for the `all-users` collection entry.
    pub collection_ttl_seconds: u64,
    /// Store a tombstone when the backing store has no record for a key.
    pub negative_results_enabled: bool,
    /// TTL for tombstones.
    pub negative_ttl_seconds: u64,
    /// Cache the collection even when the backing store is empty.
    pub cache_empty_collections: bool,
    /// Upper bound for any single cache store call.
    pub io_timeout_ms: u64,
    /// Maximum entries per namespace for the in-process store.
    pub memory_capacity: usize,
    /// Collapse concurrent misses for the same key into one store read.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            entity_ttl_seconds: settings.entity_ttl.as_secs(),
            collection_ttl_seconds: settings.collection_ttl.as_secs(),
            negative_results_enabled: settings.negative_results_enabled,
            negative_ttl_seconds: settings.negative_ttl.as_secs(),
            cache_empty_collections: settings.cache_empty_collections,
            io_timeout_ms: u64::try_from(settings.io_timeout.as_millis()).unwrap_or(u64::MAX),
            memory_capacity: settings.memory_capacity.get(),
            single_flight: settings.single_flight,
        }
    }
}

impl CacheConfig {
    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_seconds)
    }

    pub fn collection_ttl(&self) -> Duration {
        Duration::from_secs(self.collection_ttl_seconds)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_seconds)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// TTL applied to positive entries written into `namespace`.
    pub fn ttl_for(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Users => self.entity_ttl(),
            Namespace::AllUsers => self.collection_ttl(),
        }
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
