//! Cache store configuration.
//!
//! Controlled through the `[cache]` section of `programmatic-cache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_MAX_ENTRIES: usize = 1_000;
const DEFAULT_REFRESH_THRESHOLD: f64 = 0.2;
const DEFAULT_SIZE_WARNING_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_VERSION: &str = "1.0";

/// Longest lifetime an entry can get; larger TTLs are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Cache store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time to live applied when `set` does not supply one.
    pub default_ttl_secs: u64,
    /// Maximum number of entries before least-recently-accessed eviction.
    pub max_entries: usize,
    /// Remaining-lifetime fraction below which a hit is flagged near expiry.
    pub refresh_threshold: f64,
    /// Approximate payload size above which the health report warns.
    pub size_warning_bytes: u64,
    /// Interval of the background sweep that drops expired entries.
    pub sweep_interval_secs: u64,
    /// Version tag stored when `set` does not supply one.
    pub default_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            size_warning_bytes: DEFAULT_SIZE_WARNING_BYTES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            default_version: DEFAULT_VERSION.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl_secs: settings.default_ttl.as_secs(),
            max_entries: settings.max_entries.get(),
            refresh_threshold: settings.refresh_threshold,
            size_warning_bytes: settings.size_warning_bytes,
            sweep_interval_secs: settings.sweep_interval.as_secs(),
            default_version: settings.default_version.clone(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs.max(1)).min(MAX_TTL)
    }

    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Refresh threshold clamped into `[0, 1]`.
    pub fn refresh_threshold(&self) -> f64 {
        if self.refresh_threshold.is_nan() {
            return DEFAULT_REFRESH_THRESHOLD;
        }
        self.refresh_threshold.clamp(0.0, 1.0)
    }
}
