//! Bounded metric buffer with cached aggregates.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use metrics::histogram;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::page::PageType;
use crate::util::lock::mutex_lock;

use super::config::PerformanceConfig;
use super::error::PerformanceError;
use super::export::{ExportFormat, export};
use super::metric::{BatchPreloadRecord, ErrorRecord, LoadContext, PerformanceMetric, page_key};
use super::realtime::{RealtimeStats, realtime_stats};
use super::report::{SystemPerformanceReport, system_report};
use super::stats::{PagePerformanceStats, page_stats};

const SOURCE: &str = "performance::recorder";

pub(crate) const METRIC_PAGE_LOAD_MS: &str = "programmatic_page_load_ms";

#[derive(Default)]
struct Snapshots {
    system: Option<(Instant, SystemPerformanceReport)>,
    pages: HashMap<String, (Instant, PagePerformanceStats)>,
}

/// Records page loads and derives statistics from them.
///
/// Appends take a short lock on the buffer. Aggregation copies the buffer
/// first and computes outside the lock; results are reused for the
/// aggregation interval.
pub struct PerformanceRecorder {
    config: PerformanceConfig,
    metrics: Mutex<VecDeque<PerformanceMetric>>,
    errors: Mutex<VecDeque<ErrorRecord>>,
    batches: Mutex<VecDeque<BatchPreloadRecord>>,
    snapshots: Mutex<Snapshots>,
}

impl PerformanceRecorder {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config,
            metrics: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
            batches: Mutex::new(VecDeque::new()),
            snapshots: Mutex::new(Snapshots::default()),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// Record a page load observed now.
    pub fn record(
        &self,
        page_type: PageType,
        page_slug: &str,
        load_time: f64,
        cache_hit: bool,
        broker_count: usize,
        context: LoadContext,
    ) {
        self.record_metric(PerformanceMetric {
            timestamp: OffsetDateTime::now_utc(),
            page_type,
            page_slug: page_slug.to_string(),
            load_time,
            cache_hit,
            broker_count,
            filters: context.filters,
            generation_time: context.generation_time,
            is_preload: context.is_preload,
            is_batch_preload: context.is_batch_preload,
        });
    }

    /// Append a fully built metric, dropping the oldest beyond capacity.
    pub fn record_metric(&self, metric: PerformanceMetric) {
        if metric.load_time > self.config.slow_load_ms {
            warn!(
                page_type = %metric.page_type,
                page_slug = %metric.page_slug,
                load_time_ms = metric.load_time,
                cache_hit = metric.cache_hit,
                broker_count = metric.broker_count,
                "Slow page load"
            );
        }

        let outcome = if metric.cache_hit { "hit" } else { "miss" };
        histogram!(METRIC_PAGE_LOAD_MS, "outcome" => outcome).record(metric.load_time);

        let capacity = self.config.buffer_capacity();
        let mut buffer = mutex_lock(&self.metrics, SOURCE, "record");
        buffer.push_back(metric);
        while buffer.len() > capacity {
            buffer.pop_front();
        }
    }

    /// Statistics for one page, `None` when it was never recorded.
    pub fn page_stats(&self, page_type: PageType, page_slug: &str) -> Option<PagePerformanceStats> {
        let key = page_key(page_type, page_slug);
        if let Some((_, stats)) = mutex_lock(&self.snapshots, SOURCE, "page_stats")
            .pages
            .get(&key)
            .filter(|(computed_at, _)| self.is_fresh(*computed_at))
        {
            return Some(stats.clone());
        }

        let metrics = self.metrics();
        let stats = page_stats(&metrics, page_type, page_slug, OffsetDateTime::now_utc())?;
        let mut snapshots = mutex_lock(&self.snapshots, SOURCE, "page_stats");
        snapshots
            .pages
            .retain(|_, (computed_at, _)| self.is_fresh(*computed_at));
        snapshots.pages.insert(key, (Instant::now(), stats.clone()));
        Some(stats)
    }

    /// Report over the last 24 hours.
    pub fn system_report(&self) -> SystemPerformanceReport {
        if let Some((_, report)) = mutex_lock(&self.snapshots, SOURCE, "system_report")
            .system
            .as_ref()
            .filter(|(computed_at, _)| self.is_fresh(*computed_at))
        {
            return report.clone();
        }

        let metrics = self.metrics();
        let report = system_report(&metrics, OffsetDateTime::now_utc(), self.config.slow_load_ms);
        mutex_lock(&self.snapshots, SOURCE, "system_report").system =
            Some((Instant::now(), report.clone()));
        report
    }

    /// Activity inside the realtime window. Never cached.
    pub fn realtime_stats(&self) -> RealtimeStats {
        let metrics = self.metrics();
        let errors = self.recent_errors();
        realtime_stats(
            &metrics,
            &errors,
            OffsetDateTime::now_utc(),
            self.config.realtime_window(),
        )
    }

    pub fn export(&self, format: ExportFormat) -> Result<String, PerformanceError> {
        export(&self.metrics(), format)
    }

    /// Log a page generation failure.
    pub fn track_error(&self, page_key: &str, message: &str) {
        warn!(page_key, error = message, "Page generation failed");
        let record = ErrorRecord {
            timestamp: OffsetDateTime::now_utc(),
            page_key: page_key.to_string(),
            message: message.to_string(),
        };
        push_bounded(
            &mut mutex_lock(&self.errors, SOURCE, "track_error"),
            record,
            self.config.error_log_capacity.max(1),
        );
    }

    /// Log one pre-warm run.
    pub fn track_batch_preload(&self, page_count: usize, total_time: f64, current_page: Option<String>) {
        let average_time = if page_count == 0 {
            0.0
        } else {
            total_time / page_count as f64
        };
        info!(page_count, total_time_ms = total_time, average_time_ms = average_time, "Batch preload recorded");
        let record = BatchPreloadRecord {
            timestamp: OffsetDateTime::now_utc(),
            page_count,
            total_time,
            average_time,
            current_page,
        };
        push_bounded(
            &mut mutex_lock(&self.batches, SOURCE, "track_batch_preload"),
            record,
            self.config.batch_log_capacity.max(1),
        );
    }

    /// Tracked errors, oldest first.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        mutex_lock(&self.errors, SOURCE, "recent_errors").iter().cloned().collect()
    }

    /// Tracked batch preloads, oldest first.
    pub fn batch_preloads(&self) -> Vec<BatchPreloadRecord> {
        mutex_lock(&self.batches, SOURCE, "batch_preloads").iter().cloned().collect()
    }

    /// Copy of the metric buffer, oldest first.
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        mutex_lock(&self.metrics, SOURCE, "snapshot").iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.metrics, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop metrics, logs and cached aggregates.
    pub fn clear(&self) {
        mutex_lock(&self.metrics, SOURCE, "clear").clear();
        mutex_lock(&self.errors, SOURCE, "clear").clear();
        mutex_lock(&self.batches, SOURCE, "clear").clear();
        *mutex_lock(&self.snapshots, SOURCE, "clear") = Snapshots::default();
    }

    fn is_fresh(&self, computed_at: Instant) -> bool {
        computed_at.elapsed() < self.config.aggregation_interval()
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T, capacity: usize) {
    log.push_back(item);
    while log.len() > capacity {
        log.pop_front();
    }
}
