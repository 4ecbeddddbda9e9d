//! Cache-aside layer for user records.
//!
//! Two namespaces are cached: `users` (one entry per username) and
//! `all-users` (the collection view). The coordinator in [`CacheAside`] owns
//! TTL and negative-result policy; stores only hold bytes.
//!
//! ```toml
//! [cache]
//! backend = "memory"            # or "redis"
//! entity_ttl_seconds = 3600
//! collection_ttl_seconds = 600
//! negative_results_enabled = false
//! # ... see config.rs for all options
//! ```

mod config;
mod coordinator;
mod flight;
mod keys;
mod remote;
mod store;

pub use config::CacheConfig;
pub use coordinator::{CacheAside, EvictionReport};
pub use flight::{FlightGroup, FlightGuard};
pub use keys::{ALL_USERS_KEY, CacheKey, Namespace};
pub use remote::RedisCacheStore;
pub use store::{CacheError, CacheStore, MemoryCacheStore};
