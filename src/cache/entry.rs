//! Cache entries and the values handed back to readers.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// One cached page payload with its expiry and access bookkeeping.
#[derive(Debug)]
pub struct CacheEntry<P> {
    pub key: String,
    pub data: Arc<P>,
    pub generated_at: Instant,
    pub expires_at: Instant,
    pub hits: u64,
    pub last_accessed: Instant,
    pub version: String,
    pub dependencies: BTreeSet<String>,
    /// Serialized JSON size of `data`, measured at write time.
    pub size_bytes: usize,
}

impl<P> CacheEntry<P> {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Fraction of the lifetime still remaining at `now`, in `[0, 1]`.
    pub fn remaining_fraction(&self, now: Instant) -> f64 {
        let total = self.expires_at.saturating_duration_since(self.generated_at);
        if total.is_zero() {
            return 0.0;
        }
        let remaining = self.expires_at.saturating_duration_since(now);
        remaining.as_secs_f64() / total.as_secs_f64()
    }

    pub fn depends_on(&self, dependency: &str) -> bool {
        self.dependencies.contains(dependency)
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.generated_at)
    }
}

/// A successful read.
#[derive(Debug, Clone)]
pub struct CacheHit<P> {
    pub data: Arc<P>,
    /// True when the entry has used up enough of its lifetime that the caller
    /// should regenerate it in the background. The value is still valid.
    pub near_expiry: bool,
    pub version: String,
    pub hits: u64,
}

/// Options accepted by [`PageCache::set`](super::PageCache::set).
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub filters: Option<Value>,
    /// Overrides the configured TTL; zero means "use the default".
    pub ttl: Option<Duration>,
    pub dependencies: Vec<String>,
    pub version: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(mut self, filters: Value) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}
