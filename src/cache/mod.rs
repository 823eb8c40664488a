//! Programmatic page cache.
//!
//! Stores generated page bundles keyed by `(type, slug, filters)` with:
//!
//! - **Lazy expiry**: entries past their TTL are dropped when read or swept
//! - **LRU eviction**: a bounded capacity evicts least-recently-accessed pages
//! - **Dependency tags**: entries carry tags such as `broker:42` or
//!   `brokers:all` that invalidation targets
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_ttl_seconds = 7200
//! max_entries = 1000
//! refresh_threshold = 0.2
//! # ... see `crate::config` for all options
//! ```

mod config;
mod entry;
mod health;
mod keys;
mod store;

pub use config::{CacheConfig, MAX_TTL};
pub use entry::{CacheEntry, CacheHit, SetOptions};
pub use health::{CacheHealthReport, CacheStats, HealthStatus, hit_rate};
pub use keys::{KEY_PREFIX, KeyPattern, cache_key, filter_hash};
pub use store::PageCache;

pub(crate) use store::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED,
    METRIC_CACHE_MISS,
};
