//! System-wide report over the last 24 hours.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::domain::page::PageType;

use super::metric::PerformanceMetric;
use super::stats::{mean, metric_hit_rate};

const REPORT_WINDOW_HOURS: i64 = 24;
const RANKED_PAGES: usize = 5;
const TARGET_HIT_RATE: f64 = 0.6;
const HEAVY_PAGE_BROKERS: usize = 50;
const HEAVY_PAGE_SLOWDOWN: f64 = 1.5;

const NO_DATA: &str = "No performance data recorded in the last 24 hours";
const WITHIN_TARGETS: &str = "All page types are performing within targets";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTypeBreakdown {
    pub page_type: PageType,
    pub avg_load_time: f64,
    pub cache_hit_rate: f64,
    pub total_views: usize,
    pub unique_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub page_type: PageType,
    pub page_slug: String,
    pub avg_load_time: f64,
    pub total_views: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPerformanceReport {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub avg_load_time: f64,
    pub cache_hit_rate: f64,
    pub total_page_views: usize,
    pub unique_pages: usize,
    pub by_page_type: Vec<PageTypeBreakdown>,
    pub fastest_pages: Vec<PageSummary>,
    pub slowest_pages: Vec<PageSummary>,
    pub recommendations: Vec<String>,
}

pub(crate) fn system_report(
    metrics: &[PerformanceMetric],
    now: OffsetDateTime,
    slow_load_ms: f64,
) -> SystemPerformanceReport {
    let since = now - Duration::hours(REPORT_WINDOW_HOURS);
    let window: Vec<&PerformanceMetric> = metrics
        .iter()
        .filter(|metric| metric.timestamp >= since)
        .collect();

    if window.is_empty() {
        return SystemPerformanceReport {
            generated_at: now,
            avg_load_time: 0.0,
            cache_hit_rate: 0.0,
            total_page_views: 0,
            unique_pages: 0,
            by_page_type: Vec::new(),
            fastest_pages: Vec::new(),
            slowest_pages: Vec::new(),
            recommendations: vec![NO_DATA.to_string()],
        };
    }

    let avg_load_time = mean(window.iter().map(|metric| metric.load_time));
    let cache_hit_rate = metric_hit_rate(window.iter().copied());
    let pages = summarize_pages(&window);
    let by_page_type = breakdown_by_type(&window);

    let mut ranked = pages.clone();
    ranked.sort_by(|left, right| {
        left.avg_load_time
            .total_cmp(&right.avg_load_time)
            .then_with(|| left.page_slug.cmp(&right.page_slug))
    });
    let fastest_pages: Vec<PageSummary> = ranked.iter().take(RANKED_PAGES).cloned().collect();
    let slowest_pages: Vec<PageSummary> = ranked.iter().rev().take(RANKED_PAGES).cloned().collect();

    let recommendations =
        recommendations(&window, avg_load_time, cache_hit_rate, &by_page_type, slow_load_ms);

    SystemPerformanceReport {
        generated_at: now,
        avg_load_time,
        cache_hit_rate,
        total_page_views: window.len(),
        unique_pages: pages.len(),
        by_page_type,
        fastest_pages,
        slowest_pages,
        recommendations,
    }
}

fn summarize_pages(window: &[&PerformanceMetric]) -> Vec<PageSummary> {
    let mut grouped: BTreeMap<(PageType, &str), Vec<f64>> = BTreeMap::new();
    for metric in window {
        grouped
            .entry((metric.page_type, metric.page_slug.as_str()))
            .or_default()
            .push(metric.load_time);
    }

    grouped
        .into_iter()
        .map(|((page_type, page_slug), load_times)| PageSummary {
            page_type,
            page_slug: page_slug.to_string(),
            avg_load_time: mean(load_times.iter().copied()),
            total_views: load_times.len(),
        })
        .collect()
}

fn breakdown_by_type(window: &[&PerformanceMetric]) -> Vec<PageTypeBreakdown> {
    PageType::ALL
        .iter()
        .filter_map(|&page_type| {
            let of_type: Vec<&PerformanceMetric> = window
                .iter()
                .copied()
                .filter(|metric| metric.page_type == page_type)
                .collect();
            if of_type.is_empty() {
                return None;
            }

            let mut slugs: Vec<&str> = of_type.iter().map(|metric| metric.page_slug.as_str()).collect();
            slugs.sort_unstable();
            slugs.dedup();

            Some(PageTypeBreakdown {
                page_type,
                avg_load_time: mean(of_type.iter().map(|metric| metric.load_time)),
                cache_hit_rate: metric_hit_rate(of_type.iter().copied()),
                total_views: of_type.len(),
                unique_pages: slugs.len(),
            })
        })
        .collect()
}

fn recommendations(
    window: &[&PerformanceMetric],
    avg_load_time: f64,
    cache_hit_rate: f64,
    by_page_type: &[PageTypeBreakdown],
    slow_load_ms: f64,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if cache_hit_rate < TARGET_HIT_RATE {
        recommendations.push(format!(
            "Cache hit rate is {:.1}%, below the 60% target; pre-warm popular pages or raise the TTL",
            cache_hit_rate * 100.0
        ));
    }

    for breakdown in by_page_type {
        if breakdown.avg_load_time > slow_load_ms {
            recommendations.push(format!(
                "{} pages average {:.0} ms, above the {:.0} ms target",
                breakdown.page_type, breakdown.avg_load_time, slow_load_ms
            ));
        }
    }

    let heavy: Vec<f64> = window
        .iter()
        .filter(|metric| metric.broker_count > HEAVY_PAGE_BROKERS)
        .map(|metric| metric.load_time)
        .collect();
    if !heavy.is_empty() && avg_load_time > 0.0 {
        let heavy_avg = mean(heavy.iter().copied());
        if heavy_avg > avg_load_time * HEAVY_PAGE_SLOWDOWN {
            recommendations.push(format!(
                "Pages listing more than {HEAVY_PAGE_BROKERS} brokers load {:.1}x slower than average; consider paginating them",
                heavy_avg / avg_load_time
            ));
        }
    }

    if recommendations.is_empty() {
        recommendations.push(WITHIN_TARGETS.to_string());
    }
    recommendations
}
