//! Telemetry recorder configuration.
//!
//! Controlled through the `[performance]` section of `programmatic-cache.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_BUFFER_CAPACITY: usize = 10_000;
const DEFAULT_SLOW_LOAD_MS: f64 = 2_000.0;
const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 300;
const DEFAULT_REALTIME_WINDOW_SECS: u64 = 300;
const DEFAULT_LOG_CAPACITY: usize = 50;

/// Widest accepted realtime window.
pub const MAX_REALTIME_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Metrics kept in the ring buffer before the oldest are dropped.
    pub buffer_capacity: usize,
    /// Loads slower than this are logged at warn level.
    pub slow_load_ms: f64,
    /// How long aggregate snapshots are reused. Zero disables reuse.
    pub aggregation_interval_secs: u64,
    /// Window covered by the realtime view.
    pub realtime_window_secs: u64,
    /// Generation errors kept for inspection.
    pub error_log_capacity: usize,
    /// Batch preload records kept for inspection.
    pub batch_log_capacity: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            slow_load_ms: DEFAULT_SLOW_LOAD_MS,
            aggregation_interval_secs: DEFAULT_AGGREGATION_INTERVAL_SECS,
            realtime_window_secs: DEFAULT_REALTIME_WINDOW_SECS,
            error_log_capacity: DEFAULT_LOG_CAPACITY,
            batch_log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl From<&crate::config::PerformanceSettings> for PerformanceConfig {
    fn from(settings: &crate::config::PerformanceSettings) -> Self {
        Self {
            buffer_capacity: settings.buffer_capacity.get(),
            slow_load_ms: settings.slow_load_ms,
            aggregation_interval_secs: settings.aggregation_interval.as_secs(),
            realtime_window_secs: settings.realtime_window.as_secs(),
            error_log_capacity: settings.error_log_capacity.get(),
            batch_log_capacity: settings.batch_log_capacity.get(),
        }
    }
}

impl PerformanceConfig {
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity.max(1)
    }

    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_secs(self.aggregation_interval_secs)
    }

    pub fn realtime_window(&self) -> time::Duration {
        let seconds = self.realtime_window_secs.min(MAX_REALTIME_WINDOW_SECS);
        time::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}
