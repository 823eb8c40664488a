//! Per-page aggregates.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::cache::hit_rate;
use crate::domain::page::PageType;

use super::metric::PerformanceMetric;

pub(crate) const TREND_HOURS: usize = 24;

/// Nearest-rank percentile: `sorted[min(floor(n * p), n - 1)]`, 0 when empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() as f64 * p).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

pub(crate) fn metric_hit_rate<'a>(metrics: impl IntoIterator<Item = &'a PerformanceMetric>) -> f64 {
    let (hits, misses) = metrics.into_iter().fold((0u64, 0u64), |(hits, misses), metric| {
        if metric.cache_hit {
            (hits + 1, misses)
        } else {
            (hits, misses + 1)
        }
    });
    hit_rate(hits, misses)
}

/// One hour of a page's load history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub hour_start: OffsetDateTime,
    pub avg_load_time: f64,
    pub hit_rate: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePerformanceStats {
    pub page_type: PageType,
    pub page_slug: String,
    pub avg_load_time: f64,
    pub p95_load_time: f64,
    pub p99_load_time: f64,
    pub cache_hit_rate: f64,
    pub total_views: usize,
    pub avg_broker_count: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_loaded_at: OffsetDateTime,
    /// Hourly points for the last 24 hours, oldest first.
    pub hourly_trend: Vec<TrendPoint>,
}

/// Aggregate every metric of one page. `None` when the page has none.
pub(crate) fn page_stats(
    metrics: &[PerformanceMetric],
    page_type: PageType,
    page_slug: &str,
    now: OffsetDateTime,
) -> Option<PagePerformanceStats> {
    let page: Vec<&PerformanceMetric> = metrics
        .iter()
        .filter(|metric| metric.page_type == page_type && metric.page_slug == page_slug)
        .collect();
    let last_loaded_at = page.iter().map(|metric| metric.timestamp).max()?;

    let mut load_times: Vec<f64> = page.iter().map(|metric| metric.load_time).collect();
    load_times.sort_by(f64::total_cmp);

    Some(PagePerformanceStats {
        page_type,
        page_slug: page_slug.to_string(),
        avg_load_time: mean(load_times.iter().copied()),
        p95_load_time: percentile(&load_times, 0.95),
        p99_load_time: percentile(&load_times, 0.99),
        cache_hit_rate: metric_hit_rate(page.iter().copied()),
        total_views: page.len(),
        avg_broker_count: mean(page.iter().map(|metric| metric.broker_count as f64)),
        last_loaded_at,
        hourly_trend: hourly_trend(&page, now),
    })
}

fn hourly_trend(page: &[&PerformanceMetric], now: OffsetDateTime) -> Vec<TrendPoint> {
    let mut buckets: Vec<Vec<&PerformanceMetric>> = vec![Vec::new(); TREND_HOURS];
    for metric in page {
        let hours_ago = (now - metric.timestamp).whole_hours();
        if let Ok(hours_ago) = usize::try_from(hours_ago) {
            if hours_ago < TREND_HOURS {
                buckets[TREND_HOURS - 1 - hours_ago].push(metric);
            }
        }
    }

    buckets
        .into_iter()
        .enumerate()
        .map(|(position, bucket)| TrendPoint {
            hour_start: now - Duration::hours((TREND_HOURS - position) as i64),
            avg_load_time: mean(bucket.iter().map(|metric| metric.load_time)),
            hit_rate: metric_hit_rate(bucket.iter().copied()),
            samples: bucket.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    const NOW: OffsetDateTime = datetime!(2026-03-01 12:00:00 UTC);

    fn metric(slug: &str, load_time: f64, cache_hit: bool, at: OffsetDateTime) -> PerformanceMetric {
        PerformanceMetric {
            timestamp: at,
            page_type: PageType::Category,
            page_slug: slug.to_string(),
            load_time,
            cache_hit,
            broker_count: 10,
            filters: None,
            generation_time: None,
            is_preload: false,
            is_batch_preload: false,
        }
    }

    #[test]
    fn percentile_uses_floor_index() {
        let sorted: Vec<f64> = (1..=10).map(|step| f64::from(step) * 100.0).collect();
        assert_eq!(percentile(&sorted, 0.95), 1000.0);
        assert_eq!(percentile(&sorted, 0.99), 1000.0);
        assert_eq!(percentile(&sorted, 0.5), 600.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[42.0], 0.99), 42.0);
    }

    #[test]
    fn page_stats_aggregate_matching_metrics() {
        let mut metrics: Vec<PerformanceMetric> = (1..=10)
            .map(|step| metric("ecn-brokers", f64::from(step) * 100.0, step % 2 == 0, NOW))
            .collect();
        metrics.push(metric("low-deposit", 5_000.0, false, NOW));

        let stats = page_stats(&metrics, PageType::Category, "ecn-brokers", NOW).unwrap();
        assert_eq!(stats.avg_load_time, 550.0);
        assert_eq!(stats.p95_load_time, 1000.0);
        assert_eq!(stats.total_views, 10);
        assert_eq!(stats.cache_hit_rate, 0.5);
        assert_eq!(stats.avg_broker_count, 10.0);
        assert_eq!(stats.last_loaded_at, NOW);
    }

    #[test]
    fn page_without_metrics_has_no_stats() {
        let metrics = vec![metric("ecn-brokers", 100.0, true, NOW)];
        assert!(page_stats(&metrics, PageType::Seo, "ecn-brokers", NOW).is_none());
    }

    #[test]
    fn hourly_trend_runs_oldest_to_newest() {
        let metrics = vec![
            metric("uk", 100.0, true, NOW - Duration::minutes(10)),
            metric("uk", 300.0, false, NOW - Duration::minutes(20)),
            metric("uk", 900.0, false, NOW - Duration::hours(5) - Duration::minutes(1)),
            metric("uk", 50.0, true, NOW - Duration::hours(30)),
        ];

        let stats = page_stats(&metrics, PageType::Category, "uk", NOW).unwrap();
        let trend = &stats.hourly_trend;
        assert_eq!(trend.len(), 24);
        assert_eq!(trend[0].hour_start, NOW - Duration::hours(24));

        assert_eq!(trend[23].samples, 2);
        assert_eq!(trend[23].avg_load_time, 200.0);
        assert_eq!(trend[23].hit_rate, 0.5);

        assert_eq!(trend[18].samples, 1);
        assert_eq!(trend[18].avg_load_time, 900.0);

        let empty = trend.iter().filter(|point| point.samples == 0).count();
        assert_eq!(empty, 22);
        assert!(trend.iter().filter(|point| point.samples == 0).all(|point| point.avg_load_time == 0.0));
        // Older than the trend window, still part of the page totals.
        assert_eq!(stats.total_views, 4);
    }
}
