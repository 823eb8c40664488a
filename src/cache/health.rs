//! Cache statistics and the derived health report.

use std::fmt;

use serde::Serialize;

const LOW_HIT_RATE: f64 = 0.5;
const NEAR_CAPACITY_RATIO: f64 = 0.9;

/// Point-in-time statistics of a [`PageCache`](super::PageCache).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Live (unexpired) entries.
    pub total_entries: usize,
    pub capacity: usize,
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_writes: u64,
    pub total_invalidations: u64,
    pub total_evictions: u64,
    pub approx_size_bytes: u64,
    /// Age of the oldest live entry in milliseconds, 0 when empty.
    pub oldest_entry_age_ms: u64,
    /// Age of the newest live entry in milliseconds, 0 when empty.
    pub newest_entry_age_ms: u64,
}

/// Hit rate as `hits / (hits + misses)`, defined as 0 with no lookups.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub stats: CacheStats,
}

impl CacheHealthReport {
    /// Derive the report from statistics and the configured size ceiling.
    ///
    /// Each threshold breach is a warning; two or more together are critical.
    pub fn evaluate(stats: CacheStats, size_warning_bytes: u64) -> Self {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        if stats.hit_rate < LOW_HIT_RATE {
            issues.push("Low cache hit rate (< 50%)".to_string());
            recommendations.push("Consider pre-warming more pages or increasing TTL".to_string());
        }

        if stats.approx_size_bytes > size_warning_bytes {
            issues.push(format!(
                "Cache size is large (> {} MiB)",
                size_warning_bytes / (1024 * 1024)
            ));
            recommendations.push("Consider reducing TTL or compressing payloads".to_string());
        }

        if stats.total_entries as f64 > stats.capacity as f64 * NEAR_CAPACITY_RATIO {
            issues.push("Cache is near capacity".to_string());
            recommendations
                .push("Consider raising cache.max_entries or shortening TTL".to_string());
        }

        let status = match issues.len() {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        };

        if issues.is_empty() {
            recommendations.push("Cache is performing well".to_string());
        }

        Self {
            status,
            issues,
            recommendations,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(entries: usize, hits: u64, misses: u64, size: u64) -> CacheStats {
        CacheStats {
            total_entries: entries,
            capacity: 100,
            hit_rate: hit_rate(hits, misses),
            total_hits: hits,
            total_misses: misses,
            total_writes: entries as u64,
            total_invalidations: 0,
            total_evictions: 0,
            approx_size_bytes: size,
            oldest_entry_age_ms: 0,
            newest_entry_age_ms: 0,
        }
    }

    #[test]
    fn hit_rate_is_zero_without_lookups() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(3, 1), 0.75);
    }

    #[test]
    fn healthy_cache_reports_no_issues() {
        let report = CacheHealthReport::evaluate(stats(10, 9, 1, 1024), 50 * 1024 * 1024);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
        assert_eq!(report.recommendations, vec!["Cache is performing well"]);
    }

    #[test]
    fn single_breach_is_a_warning() {
        let report = CacheHealthReport::evaluate(stats(10, 1, 9, 1024), 50 * 1024 * 1024);
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.issues, vec!["Low cache hit rate (< 50%)"]);
    }

    #[test]
    fn size_ceiling_is_configurable() {
        let report = CacheHealthReport::evaluate(stats(10, 9, 1, 2048), 1024);
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues[0].starts_with("Cache size is large"));
    }

    #[test]
    fn multiple_breaches_are_critical() {
        let report = CacheHealthReport::evaluate(stats(95, 0, 4, 1024), 50 * 1024 * 1024);
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.recommendations.len(), 2);
    }
}
