//! Page load telemetry.
//!
//! [`PerformanceRecorder`] keeps a bounded buffer of [`PerformanceMetric`]s and
//! derives per-page statistics, a 24 hour system report, a realtime view and
//! JSON or CSV exports from it.

mod config;
mod error;
mod export;
mod metric;
mod realtime;
mod recorder;
mod report;
mod stats;

pub use config::{MAX_REALTIME_WINDOW_SECS, PerformanceConfig};
pub use error::PerformanceError;
pub use export::{CSV_HEADER, ExportFormat};
pub use metric::{BatchPreloadRecord, ErrorRecord, LoadContext, PerformanceMetric, page_key};
pub use realtime::{RealtimeStats, RecentPage, SystemHealth};
pub use recorder::PerformanceRecorder;
pub use report::{PageSummary, PageTypeBreakdown, SystemPerformanceReport};
pub use stats::{PagePerformanceStats, TrendPoint, percentile};

pub(crate) use recorder::METRIC_PAGE_LOAD_MS;
