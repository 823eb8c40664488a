use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED,
    METRIC_CACHE_MISS,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::invalidation::{METRIC_INVALIDATION_BATCH_MS, METRIC_INVALIDATION_QUEUE_LEN};
use crate::performance::METRIC_PAGE_LOAD_MS;

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the crate emits. Safe to call
/// repeatedly; only the first call reaches the recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of page cache hits."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of page cache misses, expired entries included."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Total number of page cache evictions due to capacity."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATED,
            Unit::Count,
            "Total number of page cache entries removed by invalidation."
        );
        describe_gauge!(
            METRIC_CACHE_ENTRIES,
            Unit::Count,
            "Current number of entries in the page cache."
        );
        describe_gauge!(
            METRIC_INVALIDATION_QUEUE_LEN,
            Unit::Count,
            "Current number of pending invalidation events."
        );
        describe_histogram!(
            METRIC_INVALIDATION_BATCH_MS,
            Unit::Milliseconds,
            "Invalidation batch processing latency in milliseconds."
        );
        describe_histogram!(
            METRIC_PAGE_LOAD_MS,
            Unit::Milliseconds,
            "Page load latency in milliseconds, labelled by cache outcome."
        );
    });
}
