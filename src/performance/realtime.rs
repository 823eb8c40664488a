//! The last few minutes of traffic.

use std::fmt;

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::domain::page::PageType;

use super::metric::{ErrorRecord, PerformanceMetric};
use super::stats::mean;

const RECENT_PAGES: usize = 10;
const CRITICAL_LOAD_MS: f64 = 3_000.0;
const WARNING_LOAD_MS: f64 = 1_500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Good,
    Warning,
    Critical,
}

impl SystemHealth {
    pub fn from_avg_load(avg_load_time: f64) -> Self {
        if avg_load_time > CRITICAL_LOAD_MS {
            SystemHealth::Critical
        } else if avg_load_time > WARNING_LOAD_MS {
            SystemHealth::Warning
        } else {
            SystemHealth::Good
        }
    }
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SystemHealth::Good => "good",
            SystemHealth::Warning => "warning",
            SystemHealth::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPage {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub page_type: PageType,
    pub page_slug: String,
    pub load_time: f64,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    /// Loads inside the window.
    pub current_load: usize,
    pub avg_load_time: f64,
    /// Newest first.
    pub recent_pages: Vec<RecentPage>,
    pub system_health: SystemHealth,
    pub recent_errors: usize,
}

pub(crate) fn realtime_stats(
    metrics: &[PerformanceMetric],
    errors: &[ErrorRecord],
    now: OffsetDateTime,
    window: Duration,
) -> RealtimeStats {
    let since = now.checked_sub(window).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let mut recent: Vec<&PerformanceMetric> = metrics
        .iter()
        .filter(|metric| metric.timestamp >= since)
        .collect();
    recent.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));

    let avg_load_time = mean(recent.iter().map(|metric| metric.load_time));

    RealtimeStats {
        current_load: recent.len(),
        avg_load_time,
        recent_pages: recent
            .iter()
            .take(RECENT_PAGES)
            .map(|metric| RecentPage {
                timestamp: metric.timestamp,
                page_type: metric.page_type,
                page_slug: metric.page_slug.clone(),
                load_time: metric.load_time,
                cache_hit: metric.cache_hit,
            })
            .collect(),
        system_health: SystemHealth::from_avg_load(avg_load_time),
        recent_errors: errors.iter().filter(|error| error.timestamp >= since).count(),
    }
}
